//! Device code presentation
//!
//! While the authorizer polls, the user has to be told where to go and which
//! code to type. Presenters are the pluggable surface for that: console text,
//! a transient loopback web page, or nothing at all. A presenter returns a
//! `Presentation` guard; dropping or stopping it tears the surface down, so
//! every exit path of the device flow cleans up.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use axum::response::Html;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::{Error, Result};

/// What the user needs to complete the device flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePrompt {
    pub verification_uri: String,
    pub user_code: String,
    /// Seconds until the code expires
    pub expires_in: u64,
}

/// Surface that shows a device code to the user.
///
/// `present` must return promptly: polling starts as soon as it resolves.
/// Uses `Pin<Box<dyn Future>>` so presenters can live behind `Arc<dyn _>`.
pub trait DeviceCodePresenter: Send + Sync {
    fn present<'a>(
        &'a self,
        prompt: &'a DevicePrompt,
    ) -> Pin<Box<dyn Future<Output = Result<Presentation>> + Send + 'a>>;
}

/// Live presentation. Torn down on `stop()` or drop.
pub struct Presentation {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Presentation {
    /// Presentation with nothing to tear down (console text, silent).
    pub fn none() -> Self {
        Self { teardown: None }
    }

    /// Presentation that runs `f` exactly once when stopped or dropped.
    pub fn on_stop(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(f)),
        }
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for Presentation {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

/// Which presenter a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterKind {
    Silent,
    Console,
    Loopback,
}

impl PresenterKind {
    /// `no_browser` with `quiet` is silent, `no_browser` alone prints to the
    /// console, otherwise a loopback page is opened in the system browser.
    pub fn for_config(config: &Configuration) -> Self {
        match (config.no_browser, config.quiet) {
            (true, true) => Self::Silent,
            (true, false) => Self::Console,
            (false, _) => Self::Loopback,
        }
    }
}

/// Pick the presenter for a configuration.
pub fn presenter_for(config: &Configuration) -> Arc<dyn DeviceCodePresenter> {
    match PresenterKind::for_config(config) {
        PresenterKind::Silent => Arc::new(SilentPresenter),
        PresenterKind::Console => Arc::new(ConsolePresenter),
        PresenterKind::Loopback => Arc::new(LoopbackPresenter),
    }
}

/// Prints the URL and code to stderr.
pub struct ConsolePresenter;

impl DeviceCodePresenter for ConsolePresenter {
    fn present<'a>(
        &'a self,
        prompt: &'a DevicePrompt,
    ) -> Pin<Box<dyn Future<Output = Result<Presentation>> + Send + 'a>> {
        Box::pin(async move {
            print_prompt(prompt);
            Ok(Presentation::none())
        })
    }
}

/// Shows nothing. For automation where the code is approved out of band.
pub struct SilentPresenter;

impl DeviceCodePresenter for SilentPresenter {
    fn present<'a>(
        &'a self,
        prompt: &'a DevicePrompt,
    ) -> Pin<Box<dyn Future<Output = Result<Presentation>> + Send + 'a>> {
        Box::pin(async move {
            debug!(verification_uri = %prompt.verification_uri, "device code issued");
            Ok(Presentation::none())
        })
    }
}

/// Serves a one-page site on `127.0.0.1:<ephemeral>` showing the code and
/// the verification link, and opens it in the system browser.
pub struct LoopbackPresenter;

impl LoopbackPresenter {
    /// Bind the loopback listener and start serving. Returns the page URL and
    /// the presentation guard without opening a browser.
    pub async fn serve(prompt: &DevicePrompt) -> Result<(String, Presentation)> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Presenter(format!("binding loopback listener: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Presenter(format!("reading loopback address: {e}")))?;

        let page = render_page(prompt);
        let app = Router::new().route("/", get(move || async move { Html(page) }));

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "device code page server failed");
            }
        });

        let url = format!("http://{addr}/");
        debug!(%url, "device code page serving");

        let presentation = Presentation::on_stop(move || {
            let _ = shutdown_tx.send(());
            task.abort();
            debug!("device code page stopped");
        });
        Ok((url, presentation))
    }
}

impl DeviceCodePresenter for LoopbackPresenter {
    fn present<'a>(
        &'a self,
        prompt: &'a DevicePrompt,
    ) -> Pin<Box<dyn Future<Output = Result<Presentation>> + Send + 'a>> {
        Box::pin(async move {
            let (url, presentation) = Self::serve(prompt).await?;
            info!(%url, "opening device code page in browser");

            // Opening a browser can block on some platforms
            let fallback = prompt.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = webbrowser::open(&url) {
                    warn!(error = %e, "could not open browser, printing device code instead");
                    print_prompt(&fallback);
                }
            });

            Ok(presentation)
        })
    }
}

fn print_prompt(prompt: &DevicePrompt) {
    eprintln!(
        "\nTo authenticate, please visit this URL:\n\n    {}\n    and enter code {}\n",
        prompt.verification_uri, prompt.user_code
    );
}

fn render_page(prompt: &DevicePrompt) -> String {
    let url = escape_html(&prompt.verification_uri);
    let code = escape_html(&prompt.user_code);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Device login</title>
<style>
body {{ font-family: system-ui, sans-serif; display: flex; justify-content: center; margin-top: 15vh; }}
main {{ text-align: center; }}
.code {{ font-family: monospace; font-size: 2.5em; letter-spacing: 0.15em; margin: 0.5em 0; }}
</style>
</head>
<body>
<main>
<h1>Sign in to your database</h1>
<p>Enter this code when prompted:</p>
<p class="code">{code}</p>
<p><a href="{url}" target="_blank" rel="noopener">Continue to sign in</a></p>
<p>This code expires in {expires} seconds. You can close this page once you are signed in.</p>
</main>
</body>
</html>
"#,
        expires = prompt.expires_in
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
