//! Meal versions and the dish snapshots they pin
use crate::error::OrderError;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::{fmt, str::FromStr};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A calendar day in UTC. Time of day never takes part in comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Day(NaiveDate);

impl Day {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Day)
    }
    pub fn as_date(&self) -> NaiveDate {
        self.0
    }
    /// Day shifted by `days`, negative values move backwards.
    pub fn offset(&self, days: i64) -> Option<Self> {
        self.0
            .checked_add_signed(chrono::Duration::days(days))
            .map(Day)
    }
}

impl From<DateTime<Utc>> for Day {
    fn from(value: DateTime<Utc>) -> Self {
        Day(value.date_naive())
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

// Accepts `2024-06-01` as well as the `2024-06-01T00:00:00Z` form clients tend to send.
impl FromStr for Day {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Ok(date) => Ok(Day(date)),
            Err(err) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Day::from(dt.with_timezone(&Utc)))
                .map_err(|_| err),
        }
    }
}

impl<C> minicbor::Encode<C> for Day {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Day {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(Day)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day number to a calendar date",
            ))
    }
}

/// Sequential label of a version within its group, rendered as `V.1`, `V.2`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionLabel(pub u32);

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V.{}", self.0)
    }
}

impl FromStr for VersionLabel {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("V.")
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .map(VersionLabel)
            .ok_or_else(|| OrderError::InvalidReference(format!("version label {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ImageRef {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub path: String,
}

/// Snapshot of a catalog dish taken when a version pins it.
/// Later catalog edits never reach back into it.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct DishReference {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub price: u64, // minor currency units
    #[n(3)]
    pub weight: u32, // grams
    #[n(4)]
    pub category_id: String,
    #[n(5)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct MealVersion {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub group_key: String, // shared by every version of the same day
    #[n(2)]
    pub sequence: u32,
    #[n(3)]
    pub catering_id: String,
    #[n(4)]
    pub client_id: String,
    #[n(5)]
    pub day: Day,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub editor: String,
    #[n(8)]
    pub dishes: Vec<DishReference>,
    #[n(9)]
    pub menu_digest: String,
}

impl MealVersion {
    pub fn label(&self) -> VersionLabel {
        VersionLabel(self.sequence)
    }
    pub fn dish(&self, dish_id: &str) -> Option<&DishReference> {
        self.dishes.iter().find(|dish| dish.id == dish_id)
    }
    pub fn contains(&self, dish_id: &str) -> bool {
        self.dish(dish_id).is_some()
    }
    /// An empty version explicitly withdraws the day's menu.
    pub fn is_withdrawn(&self) -> bool {
        self.dishes.is_empty()
    }
    pub fn same_menu_as(&self, other: &MealVersion) -> bool {
        self.menu_digest == other.menu_digest
    }
}

/// Hash of the cbor encoded dish list.
pub fn menu_digest(dishes: &[DishReference]) -> Result<String, OrderError> {
    let contents = minicbor::to_vec(dishes)?;
    Ok(sha256::digest(contents.as_slice()))
}

/// Every version ever defined for one (catering, client, day), oldest first.
/// The last entry is the current version.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct MealGroup {
    #[n(0)]
    pub group_key: String,
    #[n(1)]
    pub versions: Vec<String>,
}

impl MealGroup {
    pub fn new(group_key: String) -> Self {
        Self {
            group_key,
            versions: vec![],
        }
    }
    pub fn current(&self) -> Option<&str> {
        self.versions.last().map(String::as_str)
    }
    pub fn next_sequence(&self) -> u32 {
        self.versions.len() as u32 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dish(id: &str, price: u64) -> DishReference {
        DishReference {
            id: id.into(),
            name: id.to_uppercase(),
            price,
            weight: 250,
            category_id: "soups".into(),
            images: vec![],
        }
    }

    #[test]
    fn version_labels_render_and_parse() {
        assert_eq!(VersionLabel(3).to_string(), "V.3");
        assert_eq!("V.12".parse::<VersionLabel>().unwrap(), VersionLabel(12));
        assert!("V.0".parse::<VersionLabel>().is_err());
        assert!("12".parse::<VersionLabel>().is_err());
    }

    #[test]
    fn day_parses_plain_and_rfc3339_dates() {
        let plain: Day = "2024-06-01".parse().unwrap();
        let stamped: Day = "2024-06-01T00:00:00Z".parse().unwrap();

        assert_eq!(plain, stamped);
        assert_eq!(plain.to_string(), "2024-06-01");
        assert!("01/06/2024".parse::<Day>().is_err());
    }

    #[test]
    fn day_truncates_time_of_day() {
        let morning = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 1).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 59).unwrap();

        assert_eq!(Day::from(morning), Day::from(night));
    }

    #[test]
    fn day_encoding() {
        let original = Day::from_ymd(2024, 2, 29).unwrap();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Day = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn group_sequence_follows_version_count() {
        let mut group = MealGroup::new("mealgrp_test".into());
        assert_eq!(group.next_sequence(), 1);
        assert_eq!(group.current(), None);

        group.versions.push("meal_a".into());
        group.versions.push("meal_b".into());
        assert_eq!(group.next_sequence(), 3);
        assert_eq!(group.current(), Some("meal_b"));
    }

    #[test]
    fn digest_tracks_menu_contents() {
        let a = menu_digest(&[dish("soup", 300), dish("bread", 50)]).unwrap();
        let b = menu_digest(&[dish("soup", 300), dish("bread", 50)]).unwrap();
        let c = menu_digest(&[dish("soup", 350), dish("bread", 50)]).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
