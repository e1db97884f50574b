use std::collections::HashSet;

use crate::ledger::models::MemberId;

/// Membership changes needed for one mapping, sorted for stable call order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// Authoritative but not in the room
    pub to_add: Vec<MemberId>,
    /// In the room but not authoritative
    pub to_remove: Vec<MemberId>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// `to_add = A \ O`, `to_remove = O \ A`, never containing `own_id`.
///
/// An empty input is taken at face value; callers only pass sets that were
/// fetched successfully.
pub fn diff(
    authoritative: &HashSet<MemberId>,
    observed: &HashSet<MemberId>,
    own_id: &MemberId,
) -> MembershipDiff {
    let mut to_add: Vec<MemberId> = authoritative
        .iter()
        .filter(|member| *member != own_id && !observed.contains(*member))
        .cloned()
        .collect();

    let mut to_remove: Vec<MemberId> = observed
        .iter()
        .filter(|member| *member != own_id && !authoritative.contains(*member))
        .cloned()
        .collect();

    to_add.sort();
    to_remove.sort();

    MembershipDiff { to_add, to_remove }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(members: &[&str]) -> HashSet<MemberId> {
        members.iter().map(|m| MemberId::from(*m)).collect()
    }

    fn bot() -> MemberId {
        MemberId::from("@bot:example.org")
    }

    #[test]
    fn test_basic_difference() {
        let a = set(&["@alice:example.org", "@bob:example.org"]);
        let o = set(&["@bob:example.org", "@mallory:example.org"]);

        let result = diff(&a, &o, &bot());
        assert_eq!(result.to_add, vec![MemberId::from("@alice:example.org")]);
        assert_eq!(result.to_remove, vec![MemberId::from("@mallory:example.org")]);
    }

    #[test]
    fn test_own_id_never_in_output() {
        let a = set(&["@bot:example.org", "@alice:example.org"]);
        let o = set(&["@carol:example.org"]);
        let result = diff(&a, &o, &bot());
        assert!(!result.to_add.contains(&bot()));

        let a = set(&["@alice:example.org"]);
        let o = set(&["@bot:example.org"]);
        let result = diff(&a, &o, &bot());
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_empty_authoritative_removes_everyone_but_self() {
        let o = set(&["@bot:example.org", "@alice:example.org", "@bob:example.org"]);
        let result = diff(&HashSet::new(), &o, &bot());

        assert!(result.to_add.is_empty());
        assert_eq!(
            result.to_remove,
            vec![MemberId::from("@alice:example.org"), MemberId::from("@bob:example.org")]
        );
    }

    #[test]
    fn test_case_sensitive_comparison() {
        let a = set(&["@Alice:example.org"]);
        let o = set(&["@alice:example.org"]);
        let result = diff(&a, &o, &bot());

        assert_eq!(result.to_add, vec![MemberId::from("@Alice:example.org")]);
        assert_eq!(result.to_remove, vec![MemberId::from("@alice:example.org")]);
    }

    #[test]
    fn test_partition_properties() {
        let cases: Vec<(Vec<&str>, Vec<&str>)> = vec![
            (vec![], vec![]),
            (vec!["@a:x", "@b:x", "@c:x"], vec![]),
            (vec![], vec!["@a:x", "@b:x"]),
            (vec!["@a:x", "@b:x", "@c:x"], vec!["@b:x", "@c:x", "@d:x", "@e:x"]),
            (vec!["@a:x", "@bot:example.org"], vec!["@a:x", "@bot:example.org"]),
        ];

        for (a, o) in cases {
            let a = set(&a);
            let o = set(&o);
            let result = diff(&a, &o, &bot());

            let add: HashSet<MemberId> = result.to_add.iter().cloned().collect();
            let remove: HashSet<MemberId> = result.to_remove.iter().cloned().collect();
            assert!(add.is_disjoint(&remove));

            let mut covered: HashSet<MemberId> = add.union(&remove).cloned().collect();
            covered.extend(a.intersection(&o).cloned());
            let mut all: HashSet<MemberId> = a.union(&o).cloned().collect();
            all.remove(&bot());
            covered.remove(&bot());
            assert_eq!(covered, all);
        }
    }

    #[test]
    fn test_no_change_is_empty() {
        let a = set(&["@a:x", "@b:x"]);
        assert!(diff(&a, &a.clone(), &bot()).is_empty());
    }
}
