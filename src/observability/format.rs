//! Line format shared by every log destination.
//!
//! Records are rendered as `[<YYYY-MM-DD HH:mm:ss>] <level>: <message>`.
//! Only the event's `message` is printed; other fields (stack, status,
//! request id) stay structured for layers that want them.

use std::fmt::{self, Write as _};

use chrono::Local;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// `chrono` pattern for the record timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Event formatter producing one plain line per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let line = render_line(
            &timestamp,
            *event.metadata().level(),
            &visitor.message,
            writer.has_ansi_escapes(),
        );
        writeln!(writer, "{line}")
    }
}

/// Render a record. `colorize` wraps the level in ANSI color codes.
pub fn render_line(timestamp: &str, level: Level, message: &str, colorize: bool) -> String {
    let name = level_name(level);
    if colorize {
        format!("[{timestamp}] \x1b[{}m{name}\x1b[39m: {message}", level_color(level))
    } else {
        format!("[{timestamp}] {name}: {message}")
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

fn level_color(level: Level) -> u8 {
    match level {
        Level::ERROR => 31,
        Level::WARN => 33,
        Level::INFO => 32,
        Level::DEBUG => 34,
        Level::TRACE => 35,
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        }
    }
}
