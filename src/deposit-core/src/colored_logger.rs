//! Stderr log formatting with a per-command tag
//!
//! Lines look like `12:04:31 CAPTURE debug detection tick`. Stdout stays free
//! for the JSON the CLI prints.

use owo_colors::{OwoColorize, Style};
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Which CLI command is logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Capture,
    Parse,
    Config,
}

impl Component {
    fn tag(self) -> (&'static str, Style) {
        match self {
            Component::Capture => ("CAPTURE", Style::new().cyan().bold()),
            Component::Parse => ("PARSE", Style::new().green()),
            Component::Config => ("CONFIG", Style::new().yellow()),
        }
    }
}

fn level_style(level: &Level) -> Style {
    match *level {
        Level::ERROR => Style::new().red().bold(),
        Level::WARN => Style::new().yellow(),
        Level::INFO => Style::new(),
        _ => Style::new().dimmed(),
    }
}

pub struct ColoredFormatter {
    pub component: Component,
}

impl<S, N> FormatEvent<S, N> for ColoredFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let (tag, style) = self.component.tag();
        let level = event.metadata().level();

        write!(
            writer,
            "{} {} ",
            chrono::Local::now().format("%H:%M:%S").dimmed(),
            tag.style(style)
        )?;
        // Info lines carry no level word
        if *level != Level::INFO {
            let word = level.as_str().to_lowercase();
            write!(writer, "{} ", word.style(level_style(level)))?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber; `RUST_LOG` still applies on top of the level.
pub fn init_component_logger(component: Component, verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(ColoredFormatter { component })
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    Ok(())
}
