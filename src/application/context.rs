//! Wiring of the pipeline from settings, including the startup capability
//! check that decides whether PDF export is offered at all.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::Settings,
    infra::{
        error::InfraError,
        process::resolve_program,
        stylesheets::{Stylesheet, StylesheetCatalog},
        xslt::XsltProcessor,
    },
};

use super::{
    conformance::ConformanceCheck,
    error::AppError,
    pipeline::DocumentPipeline,
    render::{FopRenderAdapter, PdfRenderer, RenderGate},
    transform::XsltTransformer,
};

/// What the running process can do, decided once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub html_preview: bool,
    pub pdf_export: bool,
    /// Human-readable reasons a capability is switched off.
    pub problems: Vec<String>,
}

impl Capabilities {
    pub fn detect(settings: &Settings, catalog: &StylesheetCatalog) -> Self {
        let mut problems = Vec::new();

        let xslt_found = resolve_program(&settings.xslt.program).is_some();
        if !xslt_found {
            problems.push(format!(
                "XSLT processor `{}` not found",
                settings.xslt.program.display()
            ));
        }

        for missing in catalog.missing() {
            problems.push(format!(
                "stylesheet `{}` missing",
                catalog.path(missing).display()
            ));
        }

        let engine_found = resolve_program(&settings.render.program).is_some();
        if !engine_found {
            problems.push(format!(
                "formatting engine `{}` not found",
                settings.render.program.display()
            ));
        }

        let html_preview = xslt_found && catalog.supports(Stylesheet::XrToHtml);
        let pdf_export = xslt_found && engine_found && catalog.supports(Stylesheet::XrToFo);

        Self {
            html_preview,
            pdf_export,
            problems,
        }
    }
}

pub struct ApplicationContext {
    pub pipeline: Arc<DocumentPipeline>,
    pub capabilities: Capabilities,
}

impl ApplicationContext {
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let catalog = StylesheetCatalog::new(&settings.stylesheets.directory)
            .map_err(|err| AppError::from(InfraError::from(err)))?;
        let capabilities = Capabilities::detect(settings, &catalog);
        report(&capabilities);

        let work_dir = settings.workspace.directory.clone();
        std::fs::create_dir_all(&work_dir).map_err(|err| {
            InfraError::configuration(format!(
                "workspace directory `{}` is unusable: {err}",
                work_dir.display()
            ))
        })?;

        let processor = Arc::new(XsltProcessor::new(
            settings.xslt.program.clone(),
            settings.xslt.args.clone(),
            catalog,
        ));

        let transformer = Arc::new(XsltTransformer::new(
            Arc::clone(&processor),
            work_dir.clone(),
            settings.transform.timeout,
        ));

        let renderer: Option<Arc<dyn PdfRenderer>> = if capabilities.pdf_export {
            Some(Arc::new(FopRenderAdapter::new(
                Arc::clone(&processor),
                settings.render.program.clone(),
                settings.render.args.clone(),
                settings.render.fonts_dir.clone(),
                work_dir.clone(),
            )))
        } else {
            None
        };

        let conformance = ConformanceCheck::from_policy(
            &settings.validation.policy,
            work_dir,
            settings.transform.timeout,
        );

        let pipeline = DocumentPipeline::new(
            Arc::new(settings.variants.clone()),
            settings.uploads.max_request_bytes.get(),
            conformance,
            transformer,
            renderer,
            RenderGate::new(settings.render.max_concurrency, settings.render.queue_wait),
            settings.render.timeout,
        );

        Ok(Self {
            pipeline: Arc::new(pipeline),
            capabilities,
        })
    }
}

fn report(capabilities: &Capabilities) {
    for problem in &capabilities.problems {
        warn!(
            target = "application::context",
            op = "capabilities::detect",
            problem = %problem,
            "Engine prerequisite unavailable"
        );
    }
    info!(
        target = "application::context",
        op = "capabilities::detect",
        html_preview = capabilities.html_preview,
        pdf_export = capabilities.pdf_export,
        "Capabilities determined"
    );
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::from_toml;
    use tempfile::TempDir;

    fn settings_for(stylesheets: &std::path::Path, render_program: &str) -> Settings {
        from_toml(&format!(
            r#"
            [stylesheets]
            directory = "{}"

            [xslt]
            program = "/bin/sh"

            [render]
            program = "{render_program}"
            fonts_dir = ""
            "#,
            stylesheets.display()
        ))
        .expect("settings")
    }

    fn write_stylesheets(dir: &std::path::Path, which: &[Stylesheet]) {
        for stylesheet in which {
            std::fs::write(dir.join(stylesheet.file_name()), "").expect("stylesheet");
        }
    }

    #[test]
    fn all_prerequisites_enable_both_capabilities() {
        let dir = TempDir::new().expect("temp dir");
        write_stylesheets(dir.path(), &Stylesheet::ALL);
        let settings = settings_for(dir.path(), "/bin/sh");

        let context = ApplicationContext::from_settings(&settings).expect("context");
        assert!(context.capabilities.pdf_export);
        assert!(context.capabilities.html_preview);
        assert!(context.capabilities.problems.is_empty());
        assert!(context.pipeline.pdf_export_available());
    }

    #[test]
    fn missing_engine_disables_pdf_export_only() {
        let dir = TempDir::new().expect("temp dir");
        write_stylesheets(dir.path(), &Stylesheet::ALL);
        let settings = settings_for(dir.path(), "/nonexistent/fop");

        let context = ApplicationContext::from_settings(&settings).expect("context");
        assert!(!context.capabilities.pdf_export);
        assert!(context.capabilities.html_preview);
        assert!(!context.pipeline.pdf_export_available());
        assert_eq!(context.capabilities.problems.len(), 1);
    }

    #[test]
    fn missing_fo_stylesheet_disables_pdf_export() {
        let dir = TempDir::new().expect("temp dir");
        write_stylesheets(
            dir.path(),
            &[
                Stylesheet::UblInvoiceToXr,
                Stylesheet::UblCreditNoteToXr,
                Stylesheet::CiiToXr,
                Stylesheet::XrToHtml,
            ],
        );
        let settings = settings_for(dir.path(), "/bin/sh");

        let capabilities = Capabilities::detect(
            &settings,
            &StylesheetCatalog::new(dir.path()).expect("catalog"),
        );
        assert!(!capabilities.pdf_export);
        assert!(capabilities.html_preview);
    }
}
