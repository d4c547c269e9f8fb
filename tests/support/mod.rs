//! Shared fixtures for router tests: fake engines, multipart bodies and a
//! pipeline wired from them.
#![allow(dead_code)]

use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, Response, header},
};
use tempfile::TempDir;
use tokio::sync::Notify;
use xrechnung_viewer::{
    application::{
        conformance::ConformanceCheck,
        error::PipelineError,
        pipeline::DocumentPipeline,
        render::{FopRenderAdapter, PdfRenderer, RenderGate},
        transform::{DocumentTransformer, TransformResult, XsltTransformer},
    },
    domain::{
        document::XmlDocument,
        variants::{LanguageVariant, VariantTable},
    },
    infra::{
        http::{AppState, build_router},
        stylesheets::{Stylesheet, StylesheetCatalog},
        xslt::XsltProcessor,
    },
};

pub const BOUNDARY: &str = "xrechnung-test-boundary";
pub const MAX_UPLOAD_BYTES: u64 = 64 * 1024;

pub const FAKE_XSLT: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    -s:*) src="${arg#-s:}" ;;
    -xsl:*) xsl="${arg#-xsl:}" ;;
    -o:*) out="${arg#-o:}" ;;
    lang=*) lang="${arg#lang=}" ;;
  esac
done
case "$xsl" in
  *-xr.xsl) cp "$src" "$out" ;;
  *xrechnung-html.xsl) printf '<html lang="%s"><body>Rechnung</body></html>' "$lang" > "$out" ;;
  *xr-pdf.xsl) printf '<fo:root lang="%s"/>' "$lang" > "$out" ;;
  *) echo "unexpected stylesheet $xsl" >&2; exit 9 ;;
esac
"#;

pub const FAKE_FOP: &str = r#"#!/bin/sh
while [ "$#" -gt 0 ]; do
  case "$1" in
    -pdf) shift; pdf="$1" ;;
  esac
  shift
done
printf '%%PDF-1.4 fake' > "$pdf"
"#;

pub const SLOW_FOP: &str = "#!/bin/sh\nexec sleep 5\n";

pub fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|err| panic!("fixture {}: {err}", path.display()))
}

/// Fake XSLT and FOP scripts plus a stylesheet directory in one temp dir.
pub struct Engines {
    pub dir: TempDir,
}

impl Engines {
    pub fn new(fop_script: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let xsl = dir.path().join("xsl");
        std::fs::create_dir_all(&xsl).expect("stylesheet dir");
        for stylesheet in Stylesheet::ALL {
            std::fs::write(xsl.join(stylesheet.file_name()), "").expect("stylesheet");
        }
        std::fs::write(dir.path().join("xslt.sh"), FAKE_XSLT).expect("xslt script");
        std::fs::write(dir.path().join("fop.sh"), fop_script).expect("fop script");
        std::fs::create_dir_all(dir.path().join("work")).expect("work dir");
        Self { dir }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn leftovers(&self) -> usize {
        std::fs::read_dir(self.work_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn processor(&self) -> Arc<XsltProcessor> {
        let catalog = StylesheetCatalog::new(&self.dir.path().join("xsl")).expect("catalog");
        Arc::new(XsltProcessor::new(
            PathBuf::from("/bin/sh"),
            vec![self.dir.path().join("xslt.sh").display().to_string()],
            catalog,
        ))
    }

    pub fn transformer(&self) -> Arc<dyn DocumentTransformer> {
        Arc::new(XsltTransformer::new(
            self.processor(),
            self.work_dir(),
            Duration::from_secs(10),
        ))
    }

    pub fn renderer(&self) -> Arc<dyn PdfRenderer> {
        Arc::new(FopRenderAdapter::new(
            self.processor(),
            PathBuf::from("/bin/sh"),
            vec![self.dir.path().join("fop.sh").display().to_string()],
            None,
            self.work_dir(),
        ))
    }
}

pub struct PipelineBuilder {
    transformer: Arc<dyn DocumentTransformer>,
    renderer: Option<Arc<dyn PdfRenderer>>,
    ceiling: u32,
    queue_wait: Duration,
    render_timeout: Duration,
}

impl PipelineBuilder {
    pub fn new(transformer: Arc<dyn DocumentTransformer>) -> Self {
        Self {
            transformer,
            renderer: None,
            ceiling: 2,
            queue_wait: Duration::from_millis(200),
            render_timeout: Duration::from_secs(10),
        }
    }

    pub fn renderer(mut self, renderer: Arc<dyn PdfRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn ceiling(mut self, ceiling: u32) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn queue_wait(mut self, queue_wait: Duration) -> Self {
        self.queue_wait = queue_wait;
        self
    }

    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn build(self) -> Arc<DocumentPipeline> {
        Arc::new(DocumentPipeline::new(
            Arc::new(VariantTable::builtin()),
            MAX_UPLOAD_BYTES,
            ConformanceCheck::WellFormed,
            self.transformer,
            self.renderer,
            RenderGate::new(
                NonZeroU32::new(self.ceiling).expect("non-zero ceiling"),
                self.queue_wait,
            ),
            self.render_timeout,
        ))
    }

    pub fn router(self) -> Router {
        build_router(AppState::new(self.build()))
    }
}

/// Records how often it was asked to transform and answers with fixed HTML.
#[derive(Default)]
pub struct CountingTransformer {
    calls: AtomicUsize,
}

impl CountingTransformer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentTransformer for CountingTransformer {
    async fn transform(
        &self,
        document: &XmlDocument,
        variant: &LanguageVariant,
    ) -> Result<TransformResult, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransformResult {
            html: format!("<html lang=\"{}\"></html>", variant.stylesheet_lang()),
            variant: variant.clone(),
            syntax: document.syntax(),
        })
    }
}

/// Holds every render until released, so tests can saturate the gate.
#[derive(Default)]
pub struct BlockingRenderer {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl PdfRenderer for BlockingRenderer {
    async fn render(
        &self,
        _document: &XmlDocument,
        _variant: &LanguageVariant,
        _timeout: Duration,
    ) -> Result<Vec<u8>, PipelineError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(b"%PDF-1.4 blocked".to_vec())
    }
}

pub fn multipart_body(file: Option<(&str, &[u8])>, lang: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(lang) = lang {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"lang\"\r\n\r\n{lang}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/xml\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(uri: &str, file: Option<(&str, &[u8])>, lang: Option<&str>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(file, lang)))
        .expect("request should build")
}

pub async fn read_body(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read")
        .to_vec()
}

pub async fn read_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&read_body(response).await).expect("json body")
}
