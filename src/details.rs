//! Client detail resolution.
//!
//! A [`DetailsProvider`] supplies the OAuth client ID and secret for one token
//! request. Two strategies ship with the crate: [`ArgsDetailsProvider`] reads
//! values parsed from `--oauth-client-id`/`--oauth-client-secret`, and
//! [`InteractiveDetailsProvider`] prompts on the terminal. [`LaunchOptions`]
//! picks one of them from a single parse of the command line.

use async_trait::async_trait;
use clap::{Args, Parser};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{ClientDetails, OAuthCliError, Result};

const CLIENT_ID_FLAG: &str = "--oauth-client-id";
const CLIENT_SECRET_FLAG: &str = "--oauth-client-secret";

/// Supplies the OAuth client ID and secret
#[async_trait]
pub trait DetailsProvider: Send + Sync {
    /// Resolve the client details, giving up with `Cancelled` once `cancel` fires
    async fn details(&self, cancel: &CancellationToken) -> Result<ClientDetails>;
}

/// Provides client details taken from command-line flags
#[derive(Debug, Clone, Default)]
pub struct ArgsDetailsProvider {
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl ArgsDetailsProvider {
    pub fn new(client_id: Option<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl DetailsProvider for ArgsDetailsProvider {
    async fn details(&self, _cancel: &CancellationToken) -> Result<ClientDetails> {
        let client_id = non_empty(self.client_id.as_deref())
            .ok_or(OAuthCliError::MissingCredential(CLIENT_ID_FLAG))?;
        let client_secret = non_empty(self.client_secret.as_deref())
            .ok_or(OAuthCliError::MissingCredential(CLIENT_SECRET_FLAG))?;

        Ok(ClientDetails::new(client_id, client_secret))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Prompts the user for the client ID and then the client secret
pub struct InteractiveDetailsProvider<R, W> {
    io: Mutex<(R, W)>,
}

impl InteractiveDetailsProvider<BufReader<tokio::io::Stdin>, tokio::io::Stderr> {
    /// Prompt on stderr, read answers from stdin
    pub fn new() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl Default for InteractiveDetailsProvider<BufReader<tokio::io::Stdin>, tokio::io::Stderr> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> InteractiveDetailsProvider<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn with_io(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    async fn prompt(
        reader: &mut R,
        writer: &mut W,
        label: &str,
        flag: &'static str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        writer.write_all(format!("{label}: ").as_bytes()).await?;
        writer.flush().await?;

        let mut line = String::new();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Err(OAuthCliError::Cancelled),
            read = reader.read_line(&mut line) => read?,
        };
        if read == 0 {
            return Err(OAuthCliError::InputAborted);
        }

        let answer = line.trim_end_matches(['\r', '\n']);
        if answer.is_empty() {
            return Err(OAuthCliError::MissingCredential(flag));
        }
        Ok(answer.to_string())
    }
}

#[async_trait]
impl<R, W> DetailsProvider for InteractiveDetailsProvider<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn details(&self, cancel: &CancellationToken) -> Result<ClientDetails> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;

        let client_id =
            Self::prompt(reader, writer, "OAuth Client ID", CLIENT_ID_FLAG, cancel).await?;
        let client_secret = Self::prompt(
            reader,
            writer,
            "OAuth Client Secret",
            CLIENT_SECRET_FLAG,
            cancel,
        )
        .await?;

        Ok(ClientDetails::new(client_id, client_secret))
    }
}

/// Command-line options that decide how client details are obtained
///
/// Flatten this into the host program's own `clap` parser, or call
/// [`LaunchOptions::from_env`] when the program has no other flags.
#[derive(Debug, Clone, Default, Args)]
pub struct LaunchOptions {
    /// Prompt for the OAuth client ID and secret
    #[arg(long)]
    pub interactive: bool,

    /// OAuth client ID
    #[arg(long = "oauth-client-id", value_name = "ID")]
    pub oauth_client_id: Option<String>,

    /// OAuth client secret
    #[arg(long = "oauth-client-secret", value_name = "SECRET")]
    pub oauth_client_secret: Option<String>,
}

#[derive(Parser)]
struct LaunchArgs {
    #[command(flatten)]
    options: LaunchOptions,
}

impl LaunchOptions {
    /// Parse the process arguments
    pub fn from_env() -> Result<Self> {
        Self::try_parse_from(std::env::args_os())
    }

    /// Parse the given arguments; the first item is the program name
    pub fn try_parse_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        LaunchArgs::try_parse_from(args)
            .map(|parsed| parsed.options)
            .map_err(|e| OAuthCliError::InvalidConfig(e.to_string()))
    }

    /// Pick the provider for these options: interactive when `--interactive`
    /// was given, flag-based otherwise
    pub fn details_provider(&self) -> Box<dyn DetailsProvider> {
        if self.interactive {
            Box::new(InteractiveDetailsProvider::new())
        } else {
            Box::new(ArgsDetailsProvider::new(
                self.oauth_client_id.clone(),
                self.oauth_client_secret.clone(),
            ))
        }
    }
}
