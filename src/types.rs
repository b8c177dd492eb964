use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Date format used for the `fecha` column and query parameter.
pub const DATE_FMT: &str = "%Y%m%d";

// ---------------------------------------------------------------------------
// Sport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Tennis,
    Golf,
    Futsal,
}

impl Sport {
    pub const ALL: [Sport; 3] = [Sport::Tennis, Sport::Golf, Sport::Futsal];

    /// Backing table for this sport's partition.
    pub fn table(self) -> &'static str {
        match self {
            Sport::Tennis => "horarios",
            Sport::Golf => "golf_horarios",
            Sport::Futsal => "futsal_horarios",
        }
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sport::Tennis => "tennis",
            Sport::Golf => "golf",
            Sport::Futsal => "futsal",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Sport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tennis" => Ok(Sport::Tennis),
            "golf" => Ok(Sport::Golf),
            "futsal" => Ok(Sport::Futsal),
            other => Err(format!("unknown sport `{other}` (expected tennis, golf or futsal)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Availability records
// ---------------------------------------------------------------------------

/// Sport-specific discriminator fields of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "sport", rename_all = "lowercase")]
pub enum Slot {
    Tennis { court: String },
    /// `spots` is informational (free places at the tee time), not part of the key.
    Golf { holes: i64, spots: i64 },
    Futsal { minutes: i64, court: String },
}

impl Slot {
    pub fn sport(&self) -> Sport {
        match self {
            Slot::Tennis { .. } => Sport::Tennis,
            Slot::Golf { .. } => Sport::Golf,
            Slot::Futsal { .. } => Sport::Futsal,
        }
    }
}

/// The persisted unit. `date` is `YYYYMMDD`, `time` is canonical `hh:mm AM/PM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub venue: String,
    pub date: String,
    pub time: String,
    pub link: String,
    pub slot: Slot,
}

impl AvailabilityRecord {
    pub fn sport(&self) -> Sport {
        self.slot.sport()
    }

    /// Partition key inside the sport's table.
    pub fn partition(&self) -> (&str, &str) {
        (&self.venue, &self.date)
    }
}

/// An open time range reported by a site, before expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSlotFragment {
    pub venue: String,
    pub date: NaiveDate,
    pub court: Option<String>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// A bookable window produced by the interval expander.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AvailabilityWindow {
    pub start: NaiveDateTime,
    pub minutes: u32,
}

// ---------------------------------------------------------------------------
// Fetch tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    TennisVenues,
    MiClub,
    Squarespace,
    YepBooking,
}

impl std::fmt::Display for SiteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SiteKind::TennisVenues => "tennis_venues",
            SiteKind::MiClub => "mi_club",
            SiteKind::Squarespace => "squarespace",
            SiteKind::YepBooking => "yep_booking",
        };
        write!(f, "{s}")
    }
}

/// Site-specific parameters of one fetch, resolved from the venue registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteParams {
    TennisVenues {
        slug: String,
    },
    MiClub {
        domain: String,
        booking_resource_id: String,
        fee_group_id: String,
        holes: i64,
    },
    Squarespace {
        owner: String,
        appointment_type_id: String,
        minutes: i64,
        timezone: String,
        category: String,
    },
    YepBooking {
        url_template: String,
        link: String,
    },
}

impl SiteParams {
    pub fn kind(&self) -> SiteKind {
        match self {
            SiteParams::TennisVenues { .. } => SiteKind::TennisVenues,
            SiteParams::MiClub { .. } => SiteKind::MiClub,
            SiteParams::Squarespace { .. } => SiteKind::Squarespace,
            SiteParams::YepBooking { .. } => SiteKind::YepBooking,
        }
    }
}

/// Unit of orchestration. Stateless and safe to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub sport: Sport,
    pub venue: String,
    pub date: NaiveDate,
    pub params: SiteParams,
}

impl FetchTask {
    pub fn key(&self) -> TaskKey {
        TaskKey {
            sport: self.sport,
            venue: self.venue.clone(),
            date: self.date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub sport: Sport,
    pub venue: String,
    pub date: NaiveDate,
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.sport, self.venue, self.date.format(DATE_FMT))
    }
}

/// What a site adapter hands back for one task.
#[derive(Debug, Clone)]
pub enum SiteBatch {
    /// Open ranges that still need interval expansion; `link` goes on every
    /// record expanded from them.
    Fragments {
        fragments: Vec<RawSlotFragment>,
        link: String,
    },
    /// Already slot-shaped records.
    Records(Vec<AvailabilityRecord>),
}

/// Result of one orchestrated task. A failed task carries no records.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub key: TaskKey,
    pub records: Vec<AvailabilityRecord>,
    pub failed: bool,
}
