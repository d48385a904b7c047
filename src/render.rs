//! Presentation: turns a refresh outcome into a text panel or Waybar JSON.

use crate::error::SettingsError;
use crate::models::{PowerBand, WidgetData};
use crate::refresh::{FailureCause, RefreshOutcome, Snapshot};
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;

const TITLE: &str = "OpenDTU☀️";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WidgetSize {
    /// Power, yields and power draw
    Small,
    /// Adds the per-string DC breakdown
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable panel
    Text,
    /// JSON for a Waybar custom module
    Waybar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Band(PowerBand),
    Muted,
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    label: String,
    value: String,
    tone: Option<Tone>,
}

impl Row {
    fn plain(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            tone: None,
        }
    }

    fn toned(label: impl Into<String>, value: impl Into<String>, tone: Tone) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            tone: Some(tone),
        }
    }
}

/// Layout-independent content of one widget render
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    title: String,
    summary: String,
    rows: Vec<Row>,
    footer: Option<String>,
    warning: Option<String>,
    classes: Vec<&'static str>,
}

impl Panel {
    pub fn from_outcome(
        outcome: &RefreshOutcome,
        settings: &Settings,
        size: WidgetSize,
        now: DateTime<Utc>,
    ) -> Self {
        match outcome {
            RefreshOutcome::Fresh(snapshot) => Self::data(snapshot, settings, size, now),
            RefreshOutcome::StaleFallback { snapshot, cause } => {
                let mut panel = Self::data(snapshot, settings, size, now);
                panel.warning = Some(stale_warning(cause, snapshot.as_of, now));
                panel.classes.push("stale");
                panel
            }
            RefreshOutcome::HardFail { cause } => Self::error(hard_fail_message(cause)),
        }
    }

    pub fn settings_error(err: &SettingsError) -> Self {
        Self::error(vec![
            "Fehler: Einstellungen konnten nicht gelesen werden.".to_string(),
            "Error: could not read settings.".to_string(),
            err.to_string(),
        ])
    }

    fn error(lines: Vec<String>) -> Self {
        Self {
            title: TITLE.to_string(),
            summary: "☀ --".to_string(),
            rows: Vec::new(),
            footer: None,
            warning: Some(lines.join("\n")),
            classes: vec!["error"],
        }
    }

    fn data(snapshot: &Snapshot, settings: &Settings, size: WidgetSize, now: DateTime<Utc>) -> Self {
        let widget = &snapshot.widget;
        let mut rows = Vec::new();
        let mut classes = Vec::new();

        let title = match &widget.inverter_name {
            Some(name) => format!("{} {}", TITLE, name),
            None => TITLE.to_string(),
        };

        let summary = if widget.producing {
            let band = widget.power_band(settings);
            rows.push(Row::toned(
                "Power",
                format!("{:.2} W", widget.power_w),
                Tone::Band(band),
            ));
            classes.push(band.css_class());
            if widget.power_w >= settings.green_threshold {
                classes.push("feed-in");
            }
            format!("☀ {:.0} W", widget.power_w)
        } else {
            rows.push(Row::toned("Power", "Offline", Tone::Band(PowerBand::Red)));
            classes.push("offline");
            "☀ Offline".to_string()
        };

        rows.push(Row::plain(
            "Yield Day",
            format!("{:.2} kWh", widget.yield_day_kwh),
        ));
        rows.push(Row::plain(
            "Yield Total",
            format!("{:.2} kWh", widget.yield_total_kwh),
        ));

        if size == WidgetSize::Medium {
            for dc in &widget.dc_strings {
                rows.push(Row::plain(dc.name.clone(), format!("{:.2} W", dc.power_w)));
            }
        }

        if settings.show_power_draw {
            rows.push(power_draw_row(widget, settings));
        }

        if !widget.reachable {
            rows.push(Row::toned("Inverter", "not reachable", Tone::Muted));
        }

        let mut footer = format!("Updated {}", format_age(snapshot.as_of, now));
        if snapshot.cache_write_failed {
            footer.push_str(" (cache not saved)");
        }

        Self {
            title,
            summary,
            rows,
            footer: Some(footer),
            warning: None,
            classes,
        }
    }

    pub fn to_text(&self, color: bool) -> String {
        let width = self
            .rows
            .iter()
            .map(|r| r.label.chars().count() + 1)
            .max()
            .unwrap_or(0);

        let mut out = vec![self.title.clone()];
        for row in &self.rows {
            let label = format!("{}:", row.label);
            let value = match (color, row.tone) {
                (true, Some(tone)) => paint(&row.value, tone),
                _ => row.value.clone(),
            };
            out.push(format!("{:<width$}  {}", label, value, width = width));
        }
        if let Some(warning) = &self.warning {
            out.push(warning.clone());
        }
        if let Some(footer) = &self.footer {
            out.push(footer.clone());
        }
        out.join("\n")
    }

    pub fn to_waybar(&self) -> serde_json::Result<String> {
        serde_json::to_string(&WaybarOutput {
            text: &self.summary,
            tooltip: self.to_text(false),
            class: &self.classes,
        })
    }

    pub fn render(&self, format: OutputFormat, color: bool) -> serde_json::Result<String> {
        match format {
            OutputFormat::Text => Ok(self.to_text(color)),
            OutputFormat::Waybar => self.to_waybar(),
        }
    }
}

#[derive(Serialize)]
struct WaybarOutput<'a> {
    text: &'a str,
    tooltip: String,
    class: &'a [&'static str],
}

fn power_draw_row(widget: &WidgetData, settings: &Settings) -> Row {
    match widget.power_draw_w {
        Some(draw) => Row::toned(
            "Power Draw",
            format!("{:.2} W", draw),
            Tone::Band(PowerBand::for_power_draw(draw, settings.power_draw_threshold)),
        ),
        None => Row::toned("Power Draw", "n/a", Tone::Muted),
    }
}

fn hard_fail_message(cause: &FailureCause) -> Vec<String> {
    match cause {
        FailureCause::Connection(detail) => vec![
            "Fehler: Keine Verbindung und keine zwischengespeicherten Daten vorhanden.".to_string(),
            "Error: connection failed and no cached data is available.".to_string(),
            detail.clone(),
        ],
        FailureCause::UnexpectedResponse(detail) => vec![
            "Fehler: Unerwartete Antwort und keine zwischengespeicherten Daten vorhanden."
                .to_string(),
            "Error: unexpected response and no cached data is available.".to_string(),
            detail.clone(),
        ],
    }
}

fn stale_warning(cause: &FailureCause, as_of: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let reason = match cause {
        FailureCause::Connection(_) => "no connection",
        FailureCause::UnexpectedResponse(_) => "unexpected response",
    };
    format!(
        "⚠ Veraltete Daten / stale data ({}), as of {}",
        reason,
        format_age(as_of, now)
    )
}

fn paint(value: &str, tone: Tone) -> String {
    let code = match tone {
        Tone::Band(PowerBand::Red) => "31",
        Tone::Band(PowerBand::Yellow) => "33",
        Tone::Band(PowerBand::Green) => "32",
        Tone::Muted => "2",
    };
    format!("\x1b[{}m{}\x1b[0m", code, value)
}

/// Relative age of a reading, e.g. "5 min ago"
pub fn format_age(as_of: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(as_of);
    let minutes = duration.num_minutes();
    let hours = duration.num_hours();

    if minutes < 1 {
        "just now".to_string()
    } else if hours < 1 {
        format!("{} min ago", minutes)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else {
        let days = hours / 24;
        if days == 1 {
            "1 day ago".to_string()
        } else {
            format!("{} days ago", days)
        }
    }
}
