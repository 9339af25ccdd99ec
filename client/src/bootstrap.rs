//! Ordered map-loading strategies and the loop that runs them.
//!
//! Each strategy is tried at most once, in the order given, and the first handle
//! wins. A strategy whose inputs are missing reports `Skipped` rather than
//! failing, so the terminal diagnostic can tell "not configured" apart from
//! "configured but broken".

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use stallmap_shared::MapCredentials;

use crate::archive::decode_archive;
use crate::log;
use crate::sdk::{MapHandle, MapSdk, MapSource, MapTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    ArchiveFetch,
    Broker,
    TokenExchange,
    Credentials,
}

impl StrategyKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ArchiveFetch => "archive fetch",
            Self::Broker => "map broker",
            Self::TokenExchange => "token exchange",
            Self::Credentials => "credentials",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// The strategy's inputs were not available; nothing was attempted.
    Skipped(String),
    Failed(String),
}

impl From<String> for StrategyError {
    fn from(reason: String) -> Self {
        Self::Failed(reason)
    }
}

pub type StrategyFuture = LocalBoxFuture<'static, Result<Rc<dyn MapHandle>, StrategyError>>;

pub struct Strategy {
    pub kind: StrategyKind,
    attempt: Box<dyn Fn(Rc<BootstrapContext>) -> StrategyFuture>,
}

impl Strategy {
    pub fn new(
        kind: StrategyKind,
        attempt: impl Fn(Rc<BootstrapContext>) -> StrategyFuture + 'static,
    ) -> Self {
        Self {
            kind,
            attempt: Box::new(attempt),
        }
    }
}

/// Inputs shared by every strategy of one bootstrap run.
#[derive(Debug, Default)]
pub struct BootstrapContext {
    pub map_id: String,
    pub archive_url: Option<String>,
    pub credentials: Option<MapCredentials>,
    broker_token: RefCell<Option<String>>,
}

impl BootstrapContext {
    pub fn new(
        map_id: impl Into<String>,
        archive_url: Option<String>,
        credentials: Option<MapCredentials>,
    ) -> Self {
        Self {
            map_id: map_id.into().trim().to_string(),
            archive_url: archive_url.filter(|url| !url.trim().is_empty()),
            credentials: credentials
                .filter(|c| !c.key.trim().is_empty() && !c.secret.trim().is_empty()),
            broker_token: RefCell::new(None),
        }
    }

    pub fn broker_token(&self) -> Option<String> {
        self.broker_token.borrow().clone()
    }

    fn set_broker_token(&self, token: &str) {
        *self.broker_token.borrow_mut() = Some(token.to_string());
    }

    fn require_map_id(&self) -> Result<String, StrategyError> {
        if self.map_id.is_empty() {
            return Err(StrategyError::Skipped("no map id".to_string()));
        }
        Ok(self.map_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub kind: StrategyKind,
    pub outcome: AttemptOutcome,
}

pub struct BootstrapSuccess {
    pub handle: Rc<dyn MapHandle>,
    pub kind: StrategyKind,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapFailure {
    pub map_id: String,
    pub attempts: Vec<AttemptRecord>,
}

impl BootstrapFailure {
    /// Diagnostic shown in the error panel.
    pub fn message(&self) -> String {
        let mut lines = Vec::with_capacity(self.attempts.len() + 8);
        let map_id = if self.map_id.is_empty() {
            "(none)"
        } else {
            self.map_id.as_str()
        };
        lines.push(format!("The market map could not be loaded (map id {map_id})."));

        for attempt in &self.attempts {
            let line = match &attempt.outcome {
                AttemptOutcome::Failed(reason) => format!("- {}: failed: {reason}", attempt.kind),
                AttemptOutcome::Skipped(reason) => {
                    format!("- {}: skipped: {reason}", attempt.kind)
                }
                AttemptOutcome::Succeeded => format!("- {}: succeeded", attempt.kind),
            };
            lines.push(line);
        }

        lines.push("To fix this:".to_string());
        lines.push(
            "1. Set MAP_ARCHIVE_URL to a reachable map archive (JSON or zip) exported for this map."
                .to_string(),
        );
        lines.push(
            "2. Set MAP_API_KEY and MAP_API_SECRET on the server so the map broker can issue tokens."
                .to_string(),
        );
        lines.push(
            "3. Check that MAP_ID names a venue the vendor account is allowed to read.".to_string(),
        );
        lines.push(
            "4. Or set MAP_PUBLIC_KEY and MAP_PUBLIC_SECRET to let the browser load the map directly."
                .to_string(),
        );
        lines.join("\n")
    }
}

/// Try each strategy once, in order, until one produces a handle. Stops before
/// the next strategy as soon as `still_relevant` turns false.
pub async fn run_waterfall(
    strategies: &[Strategy],
    ctx: Rc<BootstrapContext>,
    still_relevant: impl Fn() -> bool,
) -> Result<BootstrapSuccess, BootstrapFailure> {
    let mut attempts = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        let kind = strategy.kind;
        if !still_relevant() {
            log::info(&format!("map {} bootstrap abandoned before {kind}", ctx.map_id));
            return Err(BootstrapFailure {
                map_id: ctx.map_id.clone(),
                attempts,
            });
        }
        match (strategy.attempt)(Rc::clone(&ctx)).await {
            Ok(handle) => {
                log::info(&format!("map {} loaded via {kind}", ctx.map_id));
                attempts.push(AttemptRecord {
                    kind,
                    outcome: AttemptOutcome::Succeeded,
                });
                return Ok(BootstrapSuccess {
                    handle,
                    kind,
                    attempts,
                });
            }
            Err(StrategyError::Skipped(reason)) => {
                log::info(&format!("{kind} skipped: {reason}"));
                attempts.push(AttemptRecord {
                    kind,
                    outcome: AttemptOutcome::Skipped(reason),
                });
            }
            Err(StrategyError::Failed(reason)) => {
                log::warn(&format!("{kind} failed: {reason}"));
                attempts.push(AttemptRecord {
                    kind,
                    outcome: AttemptOutcome::Failed(reason),
                });
            }
        }
    }

    let failure = BootstrapFailure {
        map_id: ctx.map_id.clone(),
        attempts,
    };
    log::warn(&failure.message());
    Err(failure)
}

/// The four strategies in priority order: local archive, broker payload,
/// broker token, direct credentials.
pub fn standard_strategies(
    sdk: Rc<dyn MapSdk>,
    transport: Rc<dyn MapTransport>,
) -> Vec<Strategy> {
    vec![
        archive_fetch(Rc::clone(&sdk), Rc::clone(&transport)),
        broker(Rc::clone(&sdk), transport),
        token_exchange(Rc::clone(&sdk)),
        credentials(sdk),
    ]
}

fn archive_fetch(sdk: Rc<dyn MapSdk>, transport: Rc<dyn MapTransport>) -> Strategy {
    Strategy::new(StrategyKind::ArchiveFetch, move |ctx| {
        let sdk = Rc::clone(&sdk);
        let transport = Rc::clone(&transport);
        async move {
            let Some(url) = ctx.archive_url.clone() else {
                return Err(StrategyError::Skipped("no archive URL configured".to_string()));
            };
            let fetched = transport.fetch_archive(url).await?;
            let decoded = decode_archive(fetched.bytes, fetched.content_type.as_deref())?;
            log::info(&format!(
                "decoded {:?} map archive with {} spaces",
                decoded.encoding,
                decoded.spaces.len()
            ));
            Ok(sdk.open_source(decoded.source).await?)
        }
        .boxed_local()
    })
}

fn broker(sdk: Rc<dyn MapSdk>, transport: Rc<dyn MapTransport>) -> Strategy {
    Strategy::new(StrategyKind::Broker, move |ctx| {
        let sdk = Rc::clone(&sdk);
        let transport = Rc::clone(&transport);
        async move {
            let map_id = ctx.require_map_id()?;
            let response = transport.request_broker(map_id).await?;
            if !response.has_payload() {
                let reason = response
                    .error
                    .unwrap_or_else(|| "broker returned no payload".to_string());
                return Err(StrategyError::Failed(reason));
            }
            if let Some(token) = response.token() {
                ctx.set_broker_token(token);
            }

            let mut reasons = Vec::new();
            if let Some(data) = response.map_data.filter(|data| !data.is_null()) {
                match sdk.open_source(MapSource::Json(data)).await {
                    Ok(handle) => return Ok(handle),
                    Err(e) => reasons.push(format!("mapData: {e}")),
                }
            }
            if let Some(encoded) = response.mvf_base64.filter(|b64| !b64.is_empty()) {
                match BASE64.decode(encoded.as_bytes()) {
                    Ok(bytes) => match sdk.open_source(MapSource::Archive(bytes)).await {
                        Ok(handle) => return Ok(handle),
                        Err(e) => reasons.push(format!("mvfBase64: {e}")),
                    },
                    Err(e) => reasons.push(format!("mvfBase64 decode error: {e}")),
                }
            }

            if reasons.is_empty() {
                reasons.push("broker returned an access token only".to_string());
            }
            Err(StrategyError::Failed(reasons.join("; ")))
        }
        .boxed_local()
    })
}

fn token_exchange(sdk: Rc<dyn MapSdk>) -> Strategy {
    Strategy::new(StrategyKind::TokenExchange, move |ctx| {
        let sdk = Rc::clone(&sdk);
        async move {
            let map_id = ctx.require_map_id()?;
            let Some(token) = ctx.broker_token() else {
                return Err(StrategyError::Skipped(
                    "no access token from the broker".to_string(),
                ));
            };
            Ok(sdk.open_with_token(token, map_id).await?)
        }
        .boxed_local()
    })
}

fn credentials(sdk: Rc<dyn MapSdk>) -> Strategy {
    Strategy::new(StrategyKind::Credentials, move |ctx| {
        let sdk = Rc::clone(&sdk);
        async move {
            let map_id = ctx.require_map_id()?;
            let Some(credentials) = ctx.credentials.clone() else {
                return Err(StrategyError::Skipped("no credentials supplied".to_string()));
            };
            Ok(sdk.open_with_credentials(credentials, map_id).await?)
        }
        .boxed_local()
    })
}
