use std::collections::HashSet;

use crate::types::IpReservation;
use crate::{Error, Result};

/// Returns every reservation whose tag set contains all of `tags`. Extra tags on
/// a reservation are allowed.
pub fn reservations_with_tags<'a, S: AsRef<str>>(
    tags: &[S],
    reservations: &'a [IpReservation],
) -> Vec<&'a IpReservation> {
    reservations
        .iter()
        .filter(|r| has_all_tags(tags, r))
        .collect()
}

/// First reservation, in list order, carrying all of `tags`. `Ok(None)` means
/// nothing matched; asking with an empty tag set is an error since it would
/// match anything.
pub fn first_reservation_with_tags<'a, S: AsRef<str>>(
    tags: &[S],
    reservations: &'a [IpReservation],
) -> Result<Option<&'a IpReservation>> {
    if tags.is_empty() {
        return Err(Error::EmptyTagSet);
    }
    Ok(reservations.iter().find(|r| has_all_tags(tags, r)))
}

fn has_all_tags<S: AsRef<str>>(tags: &[S], reservation: &IpReservation) -> bool {
    let present: HashSet<&str> = reservation.tags.iter().map(String::as_str).collect();
    tags.iter().all(|t| present.contains(t.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(id: &str, tags: &[&str]) -> IpReservation {
        IpReservation {
            id: id.into(),
            address: "10.0.0.1".into(),
            cidr: 32,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn fixtures() -> Vec<IpReservation> {
        vec![
            reservation("1", &["a", "b"]),
            reservation("2", &["c", "d"]),
            reservation("3", &["a", "d"]),
            reservation("4", &["b", "c"]),
            reservation("5", &["b", "q"]),
        ]
    }

    fn ids(found: Vec<&IpReservation>) -> Vec<&str> {
        found.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn matches_supersets_only() {
        let reservations = fixtures();
        assert_eq!(ids(reservations_with_tags(&["q"], &reservations)), vec!["5"]);
        assert!(reservations_with_tags(&["q", "n"], &reservations).is_empty());
        assert_eq!(
            ids(reservations_with_tags(&["b"], &reservations)),
            vec!["1", "4", "5"]
        );
        assert_eq!(
            ids(reservations_with_tags(&["d", "a"], &reservations)),
            vec!["3"]
        );
    }

    #[test]
    fn no_tags_matches_everything() {
        let reservations = fixtures();
        let empty: [&str; 0] = [];
        assert_eq!(reservations_with_tags(&empty, &reservations).len(), 5);
    }

    #[test]
    fn first_match_distinguishes_no_match_from_no_tags() {
        let reservations = fixtures();
        let found = first_reservation_with_tags(&["b"], &reservations).unwrap();
        assert_eq!(found.map(|r| r.id.as_str()), Some("1"));

        assert!(
            first_reservation_with_tags(&["z"], &reservations)
                .unwrap()
                .is_none()
        );

        let empty: [&str; 0] = [];
        assert!(matches!(
            first_reservation_with_tags(&empty, &reservations),
            Err(Error::EmptyTagSet)
        ));
    }
}
