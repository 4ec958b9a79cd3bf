//! Translation progress statistics for a tracked file.
//!
//! Computed from the merged unit list at the end of every successful cycle
//! and stored per file for status display. Repository totals are summed
//! from the per-file figures with [`TranslationStats::aggregate`].

use serde::{Deserialize, Serialize};

use crate::models::{StringUnit, UnitState};

/// Count of units plus their source word and character totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub units: u64,
    pub words: u64,
    pub chars: u64,
}

impl Tally {
    fn add(&mut self, words: u64, chars: u64) {
        self.units += 1;
        self.words += words;
        self.chars += chars;
    }

    fn merge(&mut self, other: &Tally) {
        self.units += other.units;
        self.words += other.words;
        self.chars += other.chars;
    }
}

/// Aggregated progress of one translation file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationStats {
    pub all: Tally,
    /// No translation at all.
    pub empty: Tally,
    pub fuzzy: Tally,
    /// State is translated or better.
    pub translated: Tally,
    /// State is below translated.
    pub todo: Tally,
    pub approved: Tally,
    /// Translated but not yet approved.
    pub unapproved: Tally,
    pub readonly: Tally,
}

impl TranslationStats {
    pub fn from_units(units: &[StringUnit]) -> Self {
        let mut stats = Self::default();
        for unit in units {
            let words = unit.source.split_whitespace().count() as u64;
            let chars = unit.source.chars().count() as u64;
            stats.all.add(words, chars);
            match unit.state {
                UnitState::Empty => stats.empty.add(words, chars),
                UnitState::Fuzzy => stats.fuzzy.add(words, chars),
                UnitState::Translated => stats.unapproved.add(words, chars),
                UnitState::Approved => stats.approved.add(words, chars),
                UnitState::ReadOnly => stats.readonly.add(words, chars),
            }
            if unit.state.is_translated() {
                stats.translated.add(words, chars);
            } else {
                stats.todo.add(words, chars);
            }
        }
        stats
    }

    /// Sum the statistics of several files.
    pub fn aggregate<'a>(files: impl IntoIterator<Item = &'a TranslationStats>) -> Self {
        let mut total = Self::default();
        for file in files {
            total.all.merge(&file.all);
            total.empty.merge(&file.empty);
            total.fuzzy.merge(&file.fuzzy);
            total.translated.merge(&file.translated);
            total.todo.merge(&file.todo);
            total.approved.merge(&file.approved);
            total.unapproved.merge(&file.unapproved);
            total.readonly.merge(&file.readonly);
        }
        total
    }

    pub fn translated_percent(&self) -> f64 {
        translation_percent(self.translated.units, self.all.units, true)
    }

    pub fn translated_words_percent(&self) -> f64 {
        translation_percent(self.translated.words, self.all.words, true)
    }

    pub fn approved_percent(&self) -> f64 {
        translation_percent(self.approved.units, self.all.units, true)
    }

    pub fn fuzzy_percent(&self) -> f64 {
        translation_percent(self.fuzzy.units, self.all.units, false)
    }

    pub fn readonly_percent(&self) -> f64 {
        translation_percent(self.readonly.units, self.all.units, false)
    }

    /// Translated units still waiting for review.
    pub fn waiting_review_percent(&self) -> f64 {
        self.translated_percent() - self.approved_percent() - self.readonly_percent()
    }
}

/// Percentage rounded to one decimal.
///
/// An empty total reads 100 for "completion" categories and 0 otherwise. The
/// rounding never reports 100 while something is missing, nor 0 while
/// something is present.
pub fn translation_percent(part: u64, total: u64, zero_complete: bool) -> f64 {
    if total == 0 {
        return if zero_complete { 100.0 } else { 0.0 };
    }
    let perc = (1000.0 * part as f64 / total as f64).round() / 10.0;
    if perc >= 100.0 && total > part {
        return 99.9;
    }
    if perc <= 0.0 && part > 0 {
        return 0.1;
    }
    perc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(key: &str, source: &str, state: UnitState) -> StringUnit {
        StringUnit::new(key, source, "", state)
    }

    #[test]
    fn test_counts_by_state() {
        let units = vec![
            unit("a", "Hello world", UnitState::Translated),
            unit("b", "Good bye", UnitState::Approved),
            unit("c", "Yes", UnitState::Fuzzy),
            unit("d", "No", UnitState::Empty),
        ];
        let stats = TranslationStats::from_units(&units);
        assert_eq!(stats.all.units, 4);
        assert_eq!(stats.all.words, 6);
        assert_eq!(stats.translated.units, 2);
        assert_eq!(stats.translated.words, 4);
        assert_eq!(stats.todo.units, 2);
        assert_eq!(stats.unapproved.units, 1);
        assert_eq!(stats.approved.units, 1);
        assert_eq!(stats.fuzzy.chars, 3);
        assert_eq!(stats.translated_percent(), 50.0);
        assert_eq!(stats.waiting_review_percent(), 25.0);
    }

    #[test]
    fn test_percent_edges() {
        assert_eq!(translation_percent(0, 0, true), 100.0);
        assert_eq!(translation_percent(0, 0, false), 0.0);
        assert_eq!(translation_percent(9999, 10000, true), 99.9);
        assert_eq!(translation_percent(1, 10000, true), 0.1);
        assert_eq!(translation_percent(1, 3, true), 33.3);
        assert_eq!(translation_percent(3, 3, true), 100.0);
    }

    #[test]
    fn test_aggregate_sums_files() {
        let es = TranslationStats::from_units(&[
            unit("a", "Hello world", UnitState::Translated),
            unit("b", "Bye", UnitState::Empty),
        ]);
        let de = TranslationStats::from_units(&[
            unit("a", "Hello world", UnitState::Approved),
            unit("b", "Bye", UnitState::Approved),
        ]);
        let total = TranslationStats::aggregate([&es, &de]);
        assert_eq!(total.all.units, 4);
        assert_eq!(total.all.words, 6);
        assert_eq!(total.translated.units, 3);
        assert_eq!(total.approved.units, 2);
        assert_eq!(total.empty.chars, 3);
        assert_eq!(total.translated_percent(), 75.0);
        // Weighted by units, not the mean of per-file percentages.
        assert_eq!(total.translated_words_percent(), 83.3);

        assert_eq!(TranslationStats::aggregate([]), TranslationStats::default());
    }

    #[test]
    fn test_empty_file() {
        let stats = TranslationStats::from_units(&[]);
        assert_eq!(stats.translated_percent(), 100.0);
        assert_eq!(stats.fuzzy_percent(), 0.0);
    }
}
