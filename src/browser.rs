use crate::{OAuthCliError, Result};

/// Opens URLs for the user
///
/// Launch failures never abort a token request; they are logged together
/// with the URL so the user can open it by hand.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Launches the system's default web browser
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        open_browser(url)
    }
}

/// Open a URL in the user's default web browser
///
/// # Errors
///
/// Returns `BrowserLaunch` if the browser cannot be launched, or always when
/// the crate was built without the `browser` feature.
///
/// # Example
///
/// ```no_run
/// use oauth_cli::open_browser;
///
/// if let Err(e) = open_browser("http://127.0.0.1:54520") {
///     eprintln!("{e}");
/// }
/// ```
#[cfg(feature = "browser")]
pub fn open_browser(url: &str) -> Result<()> {
    webbrowser::open(url).map_err(|e| OAuthCliError::BrowserLaunch(e.to_string()))
}

#[cfg(not(feature = "browser"))]
pub fn open_browser(_url: &str) -> Result<()> {
    Err(OAuthCliError::BrowserLaunch(
        "built without browser support".to_string(),
    ))
}
