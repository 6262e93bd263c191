// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Terminal styling and diagnostic logging.
//!
//! Test results go to stdout through the runner's output sink. Everything logged through
//! `tracing` goes to stderr, one line per event, prefixed by its level.

use clap::{
    Args, ValueEnum,
    builder::{
        Styles,
        styling::{AnsiColor, Effects},
    },
};
use owo_colors::{OwoColorize, Style};
use std::{fmt, sync::Once};
use tracing::{Event, Level, Subscriber, level_filters::LevelFilter, warn};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// The environment variable holding log directives, e.g. `debug` or `testsched_runner=trace`.
const LOG_ENV: &str = "TESTSCHED_LOG";

pub(crate) const CLI_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .error(AnsiColor::Red.on_default().effects(Effects::BOLD))
    .valid(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .invalid(AnsiColor::Yellow.on_default().effects(Effects::BOLD));

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "TESTSCHED_COLOR"
    )]
    pub(crate) color: ColorChoice,
}

impl OutputOpts {
    /// Installs the global log subscriber. Later calls have no effect.
    pub(crate) fn init(self) {
        init_logging(self.color.use_color_on_stderr());
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub(crate) enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn use_color_on_stderr(self) -> bool {
        match self {
            Self::Auto => supports_color::on_cached(supports_color::Stream::Stderr).is_some(),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

fn init_logging(colorize: bool) {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let directives = std::env::var(LOG_ENV).unwrap_or_default();
        let default_targets = || Targets::new().with_default(LevelFilter::INFO);
        let (targets, invalid) = match directives.trim() {
            "" => (default_targets(), None),
            directives => match directives.parse::<Targets>() {
                Ok(targets) => (targets, None),
                Err(err) => (default_targets(), Some(err)),
            },
        };

        let layer = tracing_subscriber::fmt::layer()
            .event_format(LevelPrefixFormat { colorize })
            .with_writer(std::io::stderr)
            .with_filter(targets);
        tracing_subscriber::registry().with(layer).init();

        if let Some(err) = invalid {
            warn!("ignoring invalid {LOG_ENV} value `{directives}`: {err}");
        }
    });
}

/// Formats each event as `<level>: <fields>` with no timestamps or targets.
struct LevelPrefixFormat {
    colorize: bool,
}

impl LevelPrefixFormat {
    fn label(&self, level: Level) -> (&'static str, Style) {
        let (label, style) = match level {
            Level::ERROR => ("error", Style::new().red().bold()),
            Level::WARN => ("warning", Style::new().yellow().bold()),
            Level::INFO => ("info", Style::new().bold()),
            Level::DEBUG => ("debug", Style::new().bold()),
            Level::TRACE => ("trace", Style::new().dimmed()),
        };
        (label, if self.colorize { style } else { Style::new() })
    }
}

impl<S, N> FormatEvent<S, N> for LevelPrefixFormat
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
        let (label, style) = self.label(*event.metadata().level());
        write!(writer, "{}: ", label.style(style))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
