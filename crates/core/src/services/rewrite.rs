//! Content rewrite.
//!
//! Injects click-tracking redirects and an open-tracking pixel into the
//! campaign HTML, once per recipient, before the provider send. The
//! analytics pipeline that serves the redirects lives elsewhere; from the
//! dispatcher's point of view this is a pure transform.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

#[allow(clippy::unwrap_used)] // the pattern is a literal
static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href\s*=\s*"(https?://[^"]+)""#).unwrap());

/// Per-recipient context for the rewrite.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// Job the message belongs to.
    pub job_id: String,
    /// Recipient the message goes to.
    pub recipient_id: String,
}

/// A pure HTML transform applied once per recipient.
pub trait ContentRewriter: Send + Sync {
    /// Rewrite the campaign HTML for one recipient.
    fn rewrite(&self, html: &str, ctx: &RewriteContext) -> String;
}

/// Rewriter that routes every link through the click-redirect endpoint and
/// appends an open-tracking pixel.
pub struct TrackingRewriter {
    base_url: String,
}

impl TrackingRewriter {
    /// Create a rewriter pointing at the given redirect base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    fn redirect_url(&self, target: &str, ctx: &RewriteContext) -> String {
        format!(
            "{}/c/{}/{}?u={}",
            self.base_url,
            ctx.job_id,
            ctx.recipient_id,
            urlencoding::encode(target)
        )
    }

    fn pixel_tag(&self, ctx: &RewriteContext) -> String {
        format!(
            r#"<img src="{}/o/{}/{}.gif" width="1" height="1" alt="" style="display:none">"#,
            self.base_url, ctx.job_id, ctx.recipient_id
        )
    }
}

impl ContentRewriter for TrackingRewriter {
    fn rewrite(&self, html: &str, ctx: &RewriteContext) -> String {
        let rewritten = HREF_RE.replace_all(html, |caps: &Captures<'_>| {
            format!(r#"href="{}""#, self.redirect_url(&caps[1], ctx))
        });

        let pixel = self.pixel_tag(ctx);
        if let Some(pos) = rewritten.rfind("</body>") {
            let mut out = rewritten.into_owned();
            out.insert_str(pos, &pixel);
            out
        } else {
            format!("{rewritten}{pixel}")
        }
    }
}

/// Pass-through rewriter used when tracking is not configured.
#[derive(Clone, Copy, Default)]
pub struct NoopRewriter;

impl ContentRewriter for NoopRewriter {
    fn rewrite(&self, html: &str, _ctx: &RewriteContext) -> String {
        html.to_string()
    }
}
