//! XRechnung viewer: HTML previews and PDF exports of electronic invoices
//! through the XRechnung visualization stylesheets.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
