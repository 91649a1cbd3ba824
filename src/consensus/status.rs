use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// Status of a key as observed by one node, or as decided by quorum. Verification scripts
///  print free-form outcomes; anything but the well-known literals is carried as
///  [Status::Other].
///
/// The derived ordering is used to break ties deterministically when two statuses reach the
///  quorum with the same count.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Up,
    Down,
    Empty,
    /// fewer samples than required were recorded for the key on this node
    LessThanMinSample,
    /// the recent samples disagree, and at least one of them was EMPTY
    NotFillSamples,
    /// the recent samples disagree, and none of them was EMPTY
    NoEmptyInSamples,
    EmptyRecover,
    KeyNodeNotExists,
    Other(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::Empty => "EMPTY",
            Status::LessThanMinSample => "LESS_THAN_MINSAMPLE",
            Status::NotFillSamples => "NOT_FILL_SAMPLES",
            Status::NoEmptyInSamples => "NO_EMPTY_IN_SAMPLES",
            Status::EmptyRecover => "EMPTY_RECOVER",
            Status::KeyNodeNotExists => "KEY_NODE_NOT_EXISTS",
            Status::Other(s) => s,
        }
    }

    /// true for statuses that show the resource holds data again: everything except EMPTY
    ///  and the inconclusive detector outcomes
    pub fn counts_as_recovery(&self) -> bool {
        !matches!(self, Status::LessThanMinSample | Status::NotFillSamples | Status::Empty)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        match value {
            "UP" => Status::Up,
            "DOWN" => Status::Down,
            "EMPTY" => Status::Empty,
            "LESS_THAN_MINSAMPLE" => Status::LessThanMinSample,
            "NOT_FILL_SAMPLES" => Status::NotFillSamples,
            "NO_EMPTY_IN_SAMPLES" => Status::NoEmptyInSamples,
            "EMPTY_RECOVER" => Status::EmptyRecover,
            "KEY_NODE_NOT_EXISTS" => Status::KeyNodeNotExists,
            other => Status::Other(other.to_string()),
        }
    }
}
impl From<String> for Status {
    fn from(value: String) -> Self {
        Status::from(value.as_str())
    }
}
impl From<Status> for String {
    fn from(value: Status) -> Self {
        match value {
            Status::Other(s) => s,
            s => s.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case("UP", Status::Up)]
    #[case("DOWN", Status::Down)]
    #[case("EMPTY", Status::Empty)]
    #[case("LESS_THAN_MINSAMPLE", Status::LessThanMinSample)]
    #[case("NOT_FILL_SAMPLES", Status::NotFillSamples)]
    #[case("NO_EMPTY_IN_SAMPLES", Status::NoEmptyInSamples)]
    #[case("EMPTY_RECOVER", Status::EmptyRecover)]
    #[case("KEY_NODE_NOT_EXISTS", Status::KeyNodeNotExists)]
    #[case("PENDING", Status::Other("PENDING".to_string()))]
    #[case("up", Status::Other("up".to_string()))]
    fn test_literals(#[case] literal: &str, #[case] status: Status) {
        assert_eq!(Status::from(literal), status);
        assert_eq!(status.to_string(), literal);
        assert_eq!(serde_json::to_string(&status).unwrap(), format!("\"{}\"", literal));
        assert_eq!(serde_json::from_str::<Status>(&format!("\"{}\"", literal)).unwrap(), status);
    }

    #[rstest]
    #[case(Status::Up, true)]
    #[case(Status::Down, true)]
    #[case(Status::NoEmptyInSamples, true)]
    #[case(Status::Other("DEGRADED".to_string()), true)]
    #[case(Status::Empty, false)]
    #[case(Status::LessThanMinSample, false)]
    #[case(Status::NotFillSamples, false)]
    fn test_counts_as_recovery(#[case] status: Status, #[case] expected: bool) {
        assert_eq!(status.counts_as_recovery(), expected);
    }
}
