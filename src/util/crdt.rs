//! Observations are gossiped between nodes without coordination, so they are merged as
//!  value-based CRDTs (see https://en.wikipedia.org/wiki/Conflict-free_replicated_data_type):
//!  merging returns the smallest value that is bigger than both initial values, so replicas
//!  converge regardless of the order in which they receive updates.

pub trait Crdt {
    /// Merges 'other' into 'self', modifying 'self' in place. The function returns the
    ///  ordering of 'self' and 'other' before the merge.
    fn merge_from(&mut self, other: &Self) -> CrdtOrdering;
}


/// A [CrdtOrdering] represents the partial ordering between two CRDT values (called 'self' and
/// 'other')
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CrdtOrdering {
    /// Both values were equal
    Equal,
    /// The 'self' value was strictly bigger, so the merge result is 'self'
    SelfWasBigger,
    /// The 'other' value was strictly bigger, so the merge result is 'other'
    OtherWasBigger,
    /// Neither value is strictly bigger than the other, so the merge result is some third
    ///  value that is bigger than both.
    NeitherWasBigger,
}
impl CrdtOrdering {
    /// true iff merging modified 'self'
    pub fn self_was_modified(&self) -> bool {
        match self {
            CrdtOrdering::Equal | CrdtOrdering::SelfWasBigger => false,
            CrdtOrdering::OtherWasBigger | CrdtOrdering::NeitherWasBigger => true,
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;
    use CrdtOrdering::*;

    #[rstest]
    #[case(Equal, false)]
    #[case(SelfWasBigger, false)]
    #[case(OtherWasBigger, true)]
    #[case(NeitherWasBigger, true)]
    fn test_self_was_modified(#[case] ordering: CrdtOrdering, #[case] expected: bool) {
        assert_eq!(ordering.self_was_modified(), expected);
    }
}
