use std::fmt;
use std::fs;
use std::path::Path;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::{EnsembleError, Result};

/// Ordered, de-duplicated list of team names. A team's index is its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    names: Vec<String>,
}

impl Roster {
    pub fn new(names: Vec<String>) -> Result<Self> {
        for (idx, name) in names.iter().enumerate() {
            if names[..idx].contains(name) {
                return Err(EnsembleError::DuplicateName(name.clone()));
            }
        }
        Ok(Self { names })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads one team per line. Blank lines are skipped.
    pub fn parse(raw: &str) -> Result<Self> {
        let names = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(names)
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| EnsembleError::io(path, e))?;
        Self::parse(&raw)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| EnsembleError::UnknownTeam(name.to_string()))
    }

    pub fn ensure_present(&mut self, name: &str) -> usize {
        if let Some(idx) = self.index_of(name) {
            return idx;
        }
        self.names.push(name.to_string());
        self.names.len() - 1
    }

    pub fn random_permutation<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let mut names = self.names.clone();
        names.shuffle(rng);
        Self { names }
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Renders the roster file: one name per line, in roster order.
    pub fn to_file_string(&self) -> String {
        let mut out = String::new();
        for name in &self.names {
            out.push_str(name);
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Roster::new(names(&["DEN", "ITA", "DEN"])).unwrap_err();
        assert!(matches!(err, EnsembleError::DuplicateName(ref n) if n == "DEN"));
    }

    #[test]
    fn index_of_follows_insertion_order() {
        let roster = Roster::new(names(&["BEL", "POR", "ESP"])).unwrap();
        assert_eq!(roster.index_of("POR"), Some(1));
        assert_eq!(roster.index_of("FRA"), None);
        assert!(matches!(
            roster.require("FRA"),
            Err(EnsembleError::UnknownTeam(_))
        ));
    }

    #[test]
    fn ensure_present_appends_only_new_names() {
        let mut roster = Roster::empty();
        assert_eq!(roster.ensure_present("ENG"), 0);
        assert_eq!(roster.ensure_present("GER"), 1);
        assert_eq!(roster.ensure_present("ENG"), 0);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn parse_skips_blank_lines_and_trims() {
        let roster = Roster::parse("  SUI\n\nFRA \n").unwrap();
        assert_eq!(roster.names(), &names(&["SUI", "FRA"])[..]);
        assert_eq!(roster.to_file_string(), "SUI\nFRA\n");
    }

    #[test]
    fn random_permutation_keeps_source_intact() {
        let roster = Roster::new(names(&["A", "B", "C", "D", "E", "F"])).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let shuffled = roster.random_permutation(&mut rng);

        assert_eq!(roster.name(0), Some("A"));
        assert_eq!(shuffled.len(), roster.len());
        let mut sorted = shuffled.names().to_vec();
        sorted.sort();
        assert_eq!(sorted, roster.names());
    }
}
