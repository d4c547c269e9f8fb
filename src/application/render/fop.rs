use std::{
    fmt::Write as _,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use quick_xml::escape::escape;
use tokio::process::Command;
use tracing::{error, info, warn};
use url::Url;

use crate::{
    application::{
        error::PipelineError,
        transform::{stage_to_xr, xslt_failure},
    },
    domain::{document::XmlDocument, variants::LanguageVariant},
    infra::{
        process::{ProcessError, run_bounded},
        stylesheets::Stylesheet,
        xslt::{XsltError, XsltProcessor},
    },
};

use super::{PdfRenderer, RenderJob};

const FO_FILE: &str = "invoice.fo";
const PDF_FILE: &str = "invoice.pdf";
const CONFIG_FILE: &str = "fop.xconf";
const FONT_FAMILY: &str = "SourceSerifPro";

/// (file, style, weight) for each face of the bundled serif family.
const FONT_FACES: [(&str, &str, &str); 4] = [
    ("SourceSerifPro-Light.ttf", "normal", "normal"),
    ("SourceSerifPro-SemiBold.ttf", "normal", "bold"),
    ("SourceSerifPro-LightItalic.ttf", "italic", "normal"),
    ("SourceSerifPro-SemiBoldItalic.ttf", "italic", "bold"),
];

/// Renders through `xr-pdf.xsl` into XSL-FO and then the Apache FOP command line.
#[derive(Debug, Clone)]
pub struct FopRenderAdapter {
    processor: Arc<XsltProcessor>,
    program: PathBuf,
    args: Vec<String>,
    fonts_dir: Option<PathBuf>,
    work_dir: PathBuf,
}

impl FopRenderAdapter {
    pub fn new(
        processor: Arc<XsltProcessor>,
        program: PathBuf,
        args: Vec<String>,
        fonts_dir: Option<PathBuf>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            processor,
            program,
            args,
            fonts_dir,
            work_dir,
        }
    }

    async fn run(
        &self,
        job: &RenderJob,
        document: &XmlDocument,
        variant: &LanguageVariant,
    ) -> Result<Vec<u8>, PipelineError> {
        let deadline = job.deadline();
        let timed_out = || PipelineError::RenderTimeout {
            limit: deadline.limit(),
        };
        let classify = |err: XsltError| match err {
            XsltError::Process(ProcessError::TimedOut { .. }) => timed_out(),
            other => xslt_failure(other),
        };

        let xr = stage_to_xr(&self.processor, job.workspace(), document, deadline)
            .await
            .map_err(classify)?;
        let fo = job.file(FO_FILE);
        self.processor
            .apply(
                Stylesheet::XrToFo,
                &xr,
                &fo,
                &[("lang", variant.stylesheet_lang()), ("foengine", "fop")],
                deadline.remaining(),
            )
            .await
            .map_err(classify)?;

        let configuration = fop_configuration(self.fonts_dir.as_deref())
            .map_err(|err| PipelineError::internal(format!("invalid fonts directory: {err}")))?;
        let config_path = job
            .workspace()
            .write(CONFIG_FILE, configuration.as_bytes())
            .await
            .map_err(|err| PipelineError::internal(format!("failed to write FOP config: {err}")))?;

        let pdf = job.file(PDF_FILE);
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("-c")
            .arg(&config_path)
            .arg("-fo")
            .arg(&fo)
            .arg("-pdf")
            .arg(&pdf)
            .current_dir(job.workspace().path());

        let output = match run_bounded(&mut command, deadline.remaining()).await {
            Ok(output) => output,
            Err(ProcessError::TimedOut { .. }) => return Err(timed_out()),
            Err(ProcessError::NotFound { program }) => {
                error!(
                    target = "application::render::fop",
                    op = "fop::render",
                    result = "error",
                    program = %program,
                    "Formatting engine disappeared after startup"
                );
                return Err(PipelineError::RenderUnavailable);
            }
            Err(err) => return Err(PipelineError::internal(err.to_string())),
        };

        let exit_code = output.status.code();
        if !output.success() {
            let diagnostic = output
                .diagnostic()
                .unwrap_or_else(|| "FOP execution failed".to_string());
            warn!(
                target = "application::render::fop",
                op = "fop::render",
                result = "error",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                engine_elapsed_ms = output.elapsed.as_millis() as u64,
                diagnostic = %diagnostic,
                "FOP invocation failed"
            );
            return Err(PipelineError::RenderEngine {
                exit_code,
                diagnostic,
            });
        }

        let bytes = match tokio::fs::read(&pdf).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(PipelineError::internal(format!(
                    "failed to read rendered PDF: {err}"
                )));
            }
        };
        if bytes.is_empty() {
            return Err(PipelineError::RenderEngine {
                exit_code,
                diagnostic: output
                    .diagnostic()
                    .unwrap_or_else(|| "FOP produced no PDF output".to_string()),
            });
        }

        Ok(bytes)
    }
}

#[async_trait]
impl PdfRenderer for FopRenderAdapter {
    async fn render(
        &self,
        document: &XmlDocument,
        variant: &LanguageVariant,
        timeout: Duration,
    ) -> Result<Vec<u8>, PipelineError> {
        let started_at = Instant::now();
        let job = RenderJob::open(&self.work_dir, timeout)
            .map_err(|err| PipelineError::internal(format!("failed to create workspace: {err}")))?;

        let result = self.run(&job, document, variant).await;
        job.close().await;

        if let Ok(bytes) = result.as_ref() {
            info!(
                target = "application::render::fop",
                op = "fop::render",
                result = "ok",
                syntax = document.syntax().as_str(),
                lang = variant.code(),
                pdf_bytes = bytes.len(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Invoice rendered to PDF"
            );
        }
        result
    }
}

/// FOP user configuration: accessibility on, and when `fonts_dir` is given
/// the serif family registered with subset embedding.
pub fn fop_configuration(fonts_dir: Option<&Path>) -> io::Result<String> {
    let mut xconf = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<fop version=\"1.0\">\n  <accessibility>true</accessibility>\n  <renderers>\n    <renderer mime=\"application/pdf\">\n",
    );

    if let Some(dir) = fonts_dir {
        let dir = std::path::absolute(dir)?;
        xconf.push_str("      <fonts>\n");
        for (file, style, weight) in FONT_FACES {
            let url = Url::from_file_path(dir.join(file)).map_err(|()| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("`{}` cannot be expressed as a file URL", dir.display()),
                )
            })?;
            let _ = write!(
                xconf,
                "        <font kerning=\"yes\" embed-url=\"{}\" embedding-mode=\"subset\">\n          <font-triplet name=\"{FONT_FAMILY}\" style=\"{style}\" weight=\"{weight}\"/>\n        </font>\n",
                escape(url.as_str())
            );
        }
        xconf.push_str("      </fonts>\n");
    }

    xconf.push_str("    </renderer>\n  </renderers>\n</fop>\n");
    Ok(xconf)
}
