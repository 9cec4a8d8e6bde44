// Exclusion filter - decides whether an actor is exempt from scoring.
//
// Pure functions, no side effects. Guild-level and per-detector sets are unioned:
// either layer can exclude, neither can force inclusion.

use super::moderation_models::ExclusionSet;

impl ExclusionSet {
    pub fn matches(&self, roles: &[u64], channel_id: Option<u64>, user_id: u64) -> bool {
        self.excluded_users.contains(&user_id)
            || channel_id.map_or(false, |id| self.excluded_channels.contains(&id))
            || roles.iter().any(|role| self.excluded_roles.contains(role))
    }
}

/// Check both layers for one actor.
pub fn is_excluded(
    guild: &ExclusionSet,
    detector: Option<&ExclusionSet>,
    roles: &[u64],
    channel_id: Option<u64>,
    user_id: u64,
) -> bool {
    guild.matches(roles, channel_id, user_id)
        || detector.map_or(false, |set| set.matches(roles, channel_id, user_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(roles: &[u64], channels: &[u64], users: &[u64]) -> ExclusionSet {
        ExclusionSet {
            excluded_roles: roles.iter().copied().collect(),
            excluded_channels: channels.iter().copied().collect(),
            excluded_users: users.iter().copied().collect(),
        }
    }

    #[test]
    fn any_matching_dimension_excludes() {
        let guild = set(&[10], &[20], &[30]);
        assert!(is_excluded(&guild, None, &[1, 10], None, 99));
        assert!(is_excluded(&guild, None, &[], Some(20), 99));
        assert!(is_excluded(&guild, None, &[], None, 30));
        assert!(!is_excluded(&guild, None, &[1, 2], Some(21), 99));
    }

    #[test]
    fn detector_layer_is_unioned_with_guild_layer() {
        let guild = set(&[10], &[], &[]);
        let detector = set(&[], &[55], &[]);

        assert!(is_excluded(&guild, Some(&detector), &[], Some(55), 1));
        assert!(is_excluded(&guild, Some(&detector), &[10], Some(56), 1));
        assert!(!is_excluded(&guild, Some(&detector), &[11], Some(56), 1));
    }

    #[test]
    fn empty_sets_exclude_nobody() {
        let empty = ExclusionSet::default();
        assert!(!is_excluded(&empty, Some(&empty), &[1, 2, 3], Some(4), 5));
    }
}
