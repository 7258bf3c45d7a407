// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Target distributions of a `.changes` file. */

use {once_cell::sync::Lazy, regex::Regex, thiserror::Error};

/// Distribution name `dch` uses for changelog entries that aren't ready for release.
pub const UNRELEASED: &str = "UNRELEASED";

static DISTRIBUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+0-9a-z.]+$").expect("distribution regex should compile"));

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DistributionError {
    #[error("distribution {UNRELEASED} cannot be uploaded")]
    Unreleased,

    #[error("invalid distribution name: {0:?}")]
    InvalidName(String),
}

/// An ordered, duplicate free set of distribution names.
///
/// Names must consist of lowercase ASCII letters, digits, and `-+.`. Offering
/// [UNRELEASED] is refused, but remembered so validation can report it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Distributions {
    names: Vec<String>,
    unreleased: bool,
}

impl Distributions {
    /// Add a distribution.
    ///
    /// Returns whether the name was newly added.
    pub fn add(&mut self, name: &str) -> Result<bool, DistributionError> {
        if name == UNRELEASED {
            self.unreleased = true;
            return Err(DistributionError::Unreleased);
        }

        if !DISTRIBUTION_RE.is_match(name) {
            return Err(DistributionError::InvalidName(name.to_string()));
        }

        if self.contains(name) {
            Ok(false)
        } else {
            self.names.push(name.to_string());
            Ok(true)
        }
    }

    /// Add several distributions, returning the ones that were refused.
    pub fn add_all<'a>(
        &mut self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<(&'a str, DistributionError)> {
        names
            .into_iter()
            .filter_map(|name| self.add(name).err().map(|e| (name, e)))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.as_str())
    }

    /// Whether [UNRELEASED] was ever offered to this instance.
    pub fn saw_unreleased(&self) -> bool {
        self.unreleased
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add() {
        let mut dists = Distributions::default();

        assert_eq!(dists.add("unstable"), Ok(true));
        assert_eq!(dists.add("unstable"), Ok(false));
        assert_eq!(dists.add("bullseye-backports"), Ok(true));
        assert_eq!(
            dists.add("Unstable"),
            Err(DistributionError::InvalidName("Unstable".to_string()))
        );
        assert!(!dists.saw_unreleased());
        assert_eq!(dists.add(UNRELEASED), Err(DistributionError::Unreleased));
        assert!(dists.saw_unreleased());

        assert_eq!(
            dists.iter().collect::<Vec<_>>(),
            vec!["unstable", "bullseye-backports"]
        );
    }

    #[test]
    fn add_all_reports_rejections() {
        let mut dists = Distributions::default();

        let rejected = dists.add_all("testing sid_x stable testing".split_whitespace());
        assert_eq!(
            rejected,
            vec![("sid_x", DistributionError::InvalidName("sid_x".to_string()))]
        );
        assert_eq!(dists.len(), 2);
    }
}
