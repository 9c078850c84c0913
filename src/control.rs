use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    ambient::{is_palette_color, PALETTE},
    config::AppConfig,
    coordinator::CoordinatorClient,
    presenter::{PresenterConfig, PresenterConfigStore, PresenterSetting, FONT_OPTIONS},
    session::{comment_form_url, read_persisted, SessionId},
    store::KvStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ControlAction {
    /// Show the active session and presenter settings.
    Status,
    /// Set comment opacity in percent.
    Opacity {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Select the comment font by label or family list.
    Font { family: String },
    /// Restrict comment colors. No names clears the set.
    Colors { names: Vec<String> },
    /// Hide the overlay.
    Hide,
    /// Show the overlay.
    Show,
    /// List selectable fonts.
    Fonts,
    /// List selectable colors.
    Palette,
    /// Fetch comments submitted through the form for the active session.
    Comments,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmittedComment {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Comment", default)]
    pub comment: String,
}

pub async fn run_control(config: &AppConfig, store: KvStore, action: ControlAction) -> Result<()> {
    let relay = CoordinatorClient::for_bind(&config.coordinator_bind)?;
    match action {
        ControlAction::Status => {
            let session = resolve_session(&relay, &store).await?;
            let presenter = PresenterConfig::load(&store)?;
            println!("{}", format_status(config, session.as_ref(), &presenter));
        }
        ControlAction::Opacity { percent } => {
            write_setting(store, relay, PresenterSetting::Opacity(percent)).await?;
        }
        ControlAction::Font { family } => {
            write_setting(store, relay, PresenterSetting::Font(resolve_font(&family)?)).await?;
        }
        ControlAction::Colors { names } => {
            let colors = validate_colors(&names)?;
            write_setting(store, relay, PresenterSetting::AllowedColors(colors)).await?;
        }
        ControlAction::Hide => {
            write_setting(store, relay, PresenterSetting::OverlayVisible(false)).await?;
        }
        ControlAction::Show => {
            write_setting(store, relay, PresenterSetting::OverlayVisible(true)).await?;
        }
        ControlAction::Fonts => {
            for (label, family) in FONT_OPTIONS {
                println!("{label:<18} {family}");
            }
        }
        ControlAction::Palette => {
            for (name, hex) in PALETTE {
                println!("{name:<8} {hex}");
            }
        }
        ControlAction::Comments => {
            let Some(session) = resolve_session(&relay, &store).await? else {
                bail!("no active session; start the overlay first");
            };
            let comments = fetch_comments(&config.api_base_url, &session).await?;
            println!("{} comments", comments.len());
            for comment in comments {
                println!("{}: {}", comment.name, comment.comment);
            }
        }
    }
    Ok(())
}

async fn write_setting(
    store: KvStore,
    relay: CoordinatorClient,
    setting: PresenterSetting,
) -> Result<()> {
    let change = PresenterConfigStore::new(store, Some(relay))
        .set(setting)
        .await?;
    println!("{} = {}", change.key, change.value);
    Ok(())
}

/// Prefers the running coordinator, then whatever the overlay last persisted.
async fn resolve_session(relay: &CoordinatorClient, store: &KvStore) -> Result<Option<SessionId>> {
    match relay.get_session_data().await {
        Ok(Some(data)) => {
            debug!(session = %data, "session resolved from coordinator");
            return Ok(Some(SessionId::from(data)));
        }
        Ok(None) => {}
        Err(err) => warn!(?err, "coordinator unavailable; reading persisted session"),
    }
    read_persisted(store)
}

pub fn resolve_font(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        bail!("font family must not be empty");
    }
    Ok(FONT_OPTIONS
        .iter()
        .find(|(label, family)| label.eq_ignore_ascii_case(input) || *family == input)
        .map(|(_, family)| (*family).to_owned())
        .unwrap_or_else(|| input.to_owned()))
}

pub fn validate_colors(names: &[String]) -> Result<Vec<String>> {
    if let Some(unknown) = names.iter().find(|name| !is_palette_color(name)) {
        let known: Vec<&str> = PALETTE.iter().map(|(name, _)| *name).collect();
        bail!("unknown color {unknown:?}; expected one of {}", known.join(", "));
    }
    Ok(names.iter().map(|name| name.trim().to_ascii_lowercase()).collect())
}

pub fn comments_url(api_base_url: &str, session: &SessionId) -> String {
    format!("{}/comment/get/{}", api_base_url.trim_end_matches('/'), session)
}

pub fn parse_comments(text: &str) -> Result<Vec<SubmittedComment>> {
    serde_json::from_str(text).context("invalid comment list")
}

async fn fetch_comments(api_base_url: &str, session: &SessionId) -> Result<Vec<SubmittedComment>> {
    let url = comments_url(api_base_url, session);
    let body = reqwest::get(&url)
        .await
        .with_context(|| format!("failed requesting {url}"))?
        .error_for_status()
        .with_context(|| format!("comment service rejected {url}"))?
        .text()
        .await
        .context("failed reading comment list")?;
    parse_comments(&body)
}

pub fn format_status(
    config: &AppConfig,
    session: Option<&SessionId>,
    presenter: &PresenterConfig,
) -> String {
    let mut lines = Vec::new();
    match session {
        Some(session) => {
            lines.push(format!("session:  {session}"));
            lines.push(format!(
                "form:     {}",
                comment_form_url(&config.form_base_url, session)
            ));
        }
        None => lines.push("session:  (none)".to_owned()),
    }
    lines.push(format!("opacity:  {}%", presenter.opacity));
    lines.push(format!("font:     {}", presenter.font_family));
    let colors = if presenter.allowed_colors.is_empty() {
        "(any, shown as black)".to_owned()
    } else {
        presenter.allowed_colors.join(", ")
    };
    lines.push(format!("colors:   {colors}"));
    lines.push(format!(
        "overlay:  {}",
        if presenter.overlay_visible { "shown" } else { "hidden" }
    ));
    lines.join("\n")
}
