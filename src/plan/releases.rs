//! The explicit release-order table.
//!
//! Release labels like `5.8.0-b1` do not sort correctly under lexical or
//! semver comparison (`b1` vs a final release), so ordering is always looked
//! up here and never computed from the labels themselves.

use crate::error::PlanningError;

#[derive(Debug, Clone)]
pub struct ReleaseOrder {
    labels: Vec<String>,
}

impl ReleaseOrder {
    /// Build the order table from labels in release sequence. Duplicate
    /// labels are rejected up front.
    pub fn new<I, S>(labels: I) -> Result<Self, PlanningError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(PlanningError::DuplicateVersion(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn index_of(&self, label: &str) -> Result<usize, PlanningError> {
        self.labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| PlanningError::UnknownVersion(label.to_string()))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// The label released immediately before `label`, if any.
    pub fn predecessor(&self, label: &str) -> Result<Option<&str>, PlanningError> {
        let idx = self.index_of(label)?;
        Ok(idx.checked_sub(1).map(|i| self.labels[i].as_str()))
    }

    pub fn latest(&self) -> Option<&str> {
        self.labels.last().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn order() -> ReleaseOrder {
        ReleaseOrder::new(["5.7.0-b1", "5.8.0-b1", "5.8.0-b2", "5.8.0"]).unwrap()
    }

    #[test]
    fn rejects_duplicate_labels() {
        let err = ReleaseOrder::new(["5.8.0", "5.8.0"]).unwrap_err();
        assert_eq!(err, PlanningError::DuplicateVersion("5.8.0".to_string()));
    }

    #[test]
    fn ordering_is_positional_not_lexical() {
        // "5.8.0-b1" sorts after "5.8.0" lexically; the table says otherwise.
        let order = order();
        assert!(order.index_of("5.8.0-b1").unwrap() < order.index_of("5.8.0").unwrap());
    }

    #[rstest]
    #[case("5.7.0-b1", None)]
    #[case("5.8.0-b1", Some("5.7.0-b1"))]
    #[case("5.8.0", Some("5.8.0-b2"))]
    fn predecessor_walks_the_table(#[case] label: &str, #[case] expected: Option<&str>) {
        assert_eq!(order().predecessor(label).unwrap(), expected);
    }

    #[test]
    fn unknown_label_is_a_planning_error() {
        let err = order().index_of("6.0.0").unwrap_err();
        assert_eq!(err, PlanningError::UnknownVersion("6.0.0".to_string()));
    }

    #[test]
    fn latest_is_the_last_label() {
        assert_eq!(order().latest(), Some("5.8.0"));
    }
}
