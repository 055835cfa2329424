//! Reusable hook bundles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::events::{HookOutcome, RecordContext, RecordEvent, SessionHooks};

type Clock = Arc<dyn Fn() -> String + Send + Sync>;

/// Fields a [`Timestampable`] writes for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampFields {
    /// Set before the record is inserted.
    pub on_insert: Option<String>,
    /// Set before the record is updated.
    pub on_update: Option<String>,
    /// Set before every save.
    pub on_save: Option<String>,
}

impl TimestampFields {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_insert(mut self, field: impl Into<String>) -> Self {
        self.on_insert = Some(field.into());
        self
    }

    #[must_use]
    pub fn on_update(mut self, field: impl Into<String>) -> Self {
        self.on_update = Some(field.into());
        self
    }

    #[must_use]
    pub fn on_save(mut self, field: impl Into<String>) -> Self {
        self.on_save = Some(field.into());
        self
    }

    fn field_for(&self, event: RecordEvent) -> Option<&str> {
        match event {
            RecordEvent::PreInsert => self.on_insert.as_deref(),
            RecordEvent::PreUpdate => self.on_update.as_deref(),
            RecordEvent::PreSave => self.on_save.as_deref(),
            _ => None,
        }
    }
}

/// Stamps configured datetime fields when records are written.
///
/// ```ignore
/// Timestampable::new()
///     .table("article", TimestampFields::new().on_insert("created_on").on_update("changed_on"))
///     .register(session.hooks_mut());
/// ```
#[derive(Clone)]
pub struct Timestampable {
    tables: HashMap<String, TimestampFields>,
    clock: Clock,
}

impl std::fmt::Debug for Timestampable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timestampable")
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

impl Default for Timestampable {
    fn default() -> Self {
        Self::new()
    }
}

impl Timestampable {
    /// Stamp with the current UTC time as `YYYY-MM-DD HH:MM:SS`.
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            clock: Arc::new(utc_now),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn table(mut self, name: impl Into<String>, fields: TimestampFields) -> Self {
        self.tables.insert(name.into(), fields);
        self
    }

    /// Install the pre-insert, pre-update and pre-save callbacks.
    pub fn register(self, hooks: &mut SessionHooks) {
        let shared = Arc::new(self);
        for event in [RecordEvent::PreInsert, RecordEvent::PreUpdate, RecordEvent::PreSave] {
            let behavior = Arc::clone(&shared);
            hooks.on(event, move |ctx| behavior.stamp(ctx));
        }
    }

    fn stamp(&self, ctx: &mut RecordContext<'_>) -> HookOutcome {
        let field = self
            .tables
            .get(ctx.table())
            .and_then(|fields| fields.field_for(ctx.event()))
            .map(str::to_string);
        if let Some(field) = field {
            let now = (self.clock)();
            tracing::trace!(table = %ctx.table(), field = %field, "timestamp");
            ctx.set(field, now);
        }
        HookOutcome::Continue
    }
}

fn utc_now() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format_utc(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Format seconds since the epoch as `YYYY-MM-DD HH:MM:SS`.
fn format_utc(secs: i64) -> String {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
