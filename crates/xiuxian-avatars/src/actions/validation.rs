//! Pure precondition checks for action plans.
//!
//! [`build_action`] validates a plan against the registry, the avatar's
//! cooldowns, and the world, and returns the ready-to-seat
//! [`ActionBody`]. It never mutates anything; the commit path in
//! [`handlers`](super::handlers) seats the body only after this check
//! passes.

use std::collections::BTreeMap;

use xiuxian_types::{AvatarId, MonthStamp, RegionId};
use xiuxian_world::Region;

use super::{ActionBody, filter_params, meta_for};
use crate::store::EntityStore;

/// Default months for open-ended timed actions.
const DEFAULT_MONTHS: u32 = 3;

/// Ceiling on months a single plan may run.
const MAX_MONTHS: u32 = 24;

/// Validate a plan and build its action body.
///
/// # Errors
///
/// Returns a human-readable reason when the plan cannot start: unknown
/// action, active cooldown, malformed parameters, missing target, or a
/// failed kind-specific precondition.
pub fn build_action(
    store: &EntityStore,
    avatar_id: AvatarId,
    name: &str,
    params: &BTreeMap<String, serde_json::Value>,
    regions: &BTreeMap<RegionId, Region>,
    now: MonthStamp,
) -> Result<ActionBody, String> {
    let meta = meta_for(name).ok_or_else(|| format!("unknown action: {name}"))?;
    let avatar = store
        .get(avatar_id)
        .ok_or_else(|| "unknown avatar".to_owned())?;

    if meta.cooldown_months > 0
        && let Some(last) = avatar.action_cooldowns.get(name)
        && now.months_since(*last) < meta.cooldown_months
    {
        return Err(format!(
            "{name} is on cooldown for another {} months",
            meta.cooldown_months.saturating_sub(now.months_since(*last))
        ));
    }

    let params = filter_params(meta, params);

    match name {
        "cultivate" => Ok(ActionBody::Cultivate {
            months_done: 0,
            months_target: months_param(&params)?,
        }),
        "travel" => {
            let destination = id_param(&params, "region_id")?;
            let region = regions
                .get(&destination)
                .ok_or_else(|| "destination region does not exist".to_owned())?;
            if region.center == avatar.pos {
                return Err("already at the destination".to_owned());
            }
            Ok(ActionBody::Travel { destination })
        }
        "seclude" => {
            if avatar.hp.cur.saturating_mul(2) < avatar.hp.max {
                return Err("too injured to enter seclusion".to_owned());
            }
            Ok(ActionBody::Seclude {
                months_done: 0,
                months_target: months_param(&params)?,
            })
        }
        "duel" => {
            let target: AvatarId = avatar_param(&params, "target_id")?;
            if target == avatar_id {
                return Err("cannot duel oneself".to_owned());
            }
            let opponent = store
                .get(target)
                .ok_or_else(|| "duel target does not exist".to_owned())?;
            if opponent.is_dead {
                return Err("duel target is already dead".to_owned());
            }
            Ok(ActionBody::Duel {
                target,
                rounds_fought: 0,
            })
        }
        "flee" => {
            let from: AvatarId = avatar_param(&params, "from_id")?;
            Ok(ActionBody::Flee {
                from,
                months_done: 0,
            })
        }
        "forage" => Ok(ActionBody::Forage {
            months_done: 0,
            months_target: months_param(&params)?,
        }),
        "idle" => Ok(ActionBody::Idle {
            months_done: 0,
            months_target: months_param(&params)?,
        }),
        other => Err(format!("unknown action: {other}")),
    }
}

/// Read the `months` parameter, defaulting and clamping to sane bounds.
fn months_param(params: &BTreeMap<String, serde_json::Value>) -> Result<u32, String> {
    let Some(value) = params.get("months") else {
        return Ok(DEFAULT_MONTHS);
    };
    let months = value
        .as_u64()
        .ok_or_else(|| format!("months must be a positive integer, got {value}"))?;
    let months = u32::try_from(months).map_err(|_| "months out of range".to_owned())?;
    if months == 0 {
        return Err("months must be at least 1".to_owned());
    }
    Ok(months.min(MAX_MONTHS))
}

/// Read a region-id parameter.
fn id_param(params: &BTreeMap<String, serde_json::Value>, key: &str) -> Result<RegionId, String> {
    let value = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing parameter: {key}"))?;
    RegionId::parse(value).map_err(|_| format!("{key} is not a valid id: {value}"))
}

/// Read an avatar-id parameter.
fn avatar_param(params: &BTreeMap<String, serde_json::Value>, key: &str) -> Result<AvatarId, String> {
    let value = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing parameter: {key}"))?;
    AvatarId::parse(value).map_err(|_| format!("{key} is not a valid id: {value}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use xiuxian_types::Gender;
    use xiuxian_world::RegionKind;

    use super::*;
    use crate::avatar::Avatar;

    fn setup() -> (EntityStore, BTreeMap<RegionId, Region>, AvatarId) {
        let mut store = EntityStore::new();
        let avatar = Avatar::new("Li Chen", Gender::Male, MonthStamp(0), 10, (0, 0));
        let id = avatar.id;
        store.register(avatar, false);
        (store, BTreeMap::new(), id)
    }

    #[test]
    fn default_months_apply() {
        let (store, regions, id) = setup();
        let body =
            build_action(&store, id, "cultivate", &BTreeMap::new(), &regions, MonthStamp(0))
                .unwrap();
        assert_eq!(
            body,
            ActionBody::Cultivate { months_done: 0, months_target: DEFAULT_MONTHS }
        );
    }

    #[test]
    fn months_are_clamped() {
        let (store, regions, id) = setup();
        let params = BTreeMap::from([("months".to_owned(), serde_json::json!(999))]);
        let body = build_action(&store, id, "idle", &params, &regions, MonthStamp(0)).unwrap();
        assert_eq!(body, ActionBody::Idle { months_done: 0, months_target: MAX_MONTHS });
    }

    #[test]
    fn zero_months_rejected() {
        let (store, regions, id) = setup();
        let params = BTreeMap::from([("months".to_owned(), serde_json::json!(0))]);
        assert!(build_action(&store, id, "forage", &params, &regions, MonthStamp(0)).is_err());
    }

    #[test]
    fn unknown_action_rejected() {
        let (store, regions, id) = setup();
        assert!(
            build_action(&store, id, "transcend", &BTreeMap::new(), &regions, MonthStamp(0))
                .is_err()
        );
    }

    #[test]
    fn travel_requires_a_real_destination() {
        let (store, mut regions, id) = setup();
        let missing = RegionId::new();
        let params =
            BTreeMap::from([("region_id".to_owned(), serde_json::json!(missing.to_string()))]);
        assert!(build_action(&store, id, "travel", &params, &regions, MonthStamp(0)).is_err());

        let region = Region::new("Azure Mist Grotto", RegionKind::Grotto, (9, 9), 1);
        let region_id = region.id;
        regions.insert(region_id, region);
        let params =
            BTreeMap::from([("region_id".to_owned(), serde_json::json!(region_id.to_string()))]);
        assert!(build_action(&store, id, "travel", &params, &regions, MonthStamp(0)).is_ok());
    }

    #[test]
    fn duel_requires_a_living_opponent() {
        let (mut store, regions, id) = setup();
        let mut other = Avatar::new("Mo Feng", Gender::Male, MonthStamp(0), 10, (1, 1));
        let other_id = other.id;
        other.is_dead = true;
        store.register(other, false);

        let params =
            BTreeMap::from([("target_id".to_owned(), serde_json::json!(other_id.to_string()))]);
        assert!(build_action(&store, id, "duel", &params, &regions, MonthStamp(0)).is_err());

        store.get_mut(other_id).unwrap().is_dead = false;
        assert!(build_action(&store, id, "duel", &params, &regions, MonthStamp(0)).is_ok());
    }

    #[test]
    fn cooldown_blocks_restart() {
        let (mut store, regions, id) = setup();
        store
            .get_mut(id)
            .unwrap()
            .action_cooldowns
            .insert("seclude".to_owned(), MonthStamp(10));

        // 10 months later the 24-month cooldown is still running.
        assert!(build_action(&store, id, "seclude", &BTreeMap::new(), &regions, MonthStamp(20))
            .is_err());
        // After the cooldown it starts again.
        assert!(build_action(&store, id, "seclude", &BTreeMap::new(), &regions, MonthStamp(34))
            .is_ok());
    }

    #[test]
    fn injured_avatars_cannot_seclude() {
        let (mut store, regions, id) = setup();
        store.get_mut(id).unwrap().hp.cur = 10;
        assert!(build_action(&store, id, "seclude", &BTreeMap::new(), &regions, MonthStamp(0))
            .is_err());
    }
}
