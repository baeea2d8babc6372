//! Per-task LLM adapters.
//!
//! The simulator talks to models through [`AiSource`]: either the real
//! bounded gateway or a scripted oracle that answers deterministically
//! with no network (headless runs, tests, `llm.mode: scripted`).
//! This module also owns the typed shapes the phases expect back --
//! plan decisions, relation decisions, one-line generations -- and the
//! context builders that turn world state into template substitutions.
//!
//! Shape validation happens here, not in the gateway: a malformed
//! response degrades into "no decision this tick" for the affected
//! avatar.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use xiuxian_ai::{AiError, LlmGateway};
use xiuxian_avatars::actions::{ActionPlan, meta_for};
use xiuxian_types::{AvatarId, RelationKind};

use crate::world::World;

/// The simulator's source of model answers.
///
/// Enum dispatch, like the gateway's backends: async methods are not
/// dyn-compatible, and two variants are all there will be.
pub enum AiSource {
    /// The real bounded LLM gateway.
    Gateway(LlmGateway),
    /// Deterministic canned answers, no network.
    Scripted(ScriptedOracle),
}

impl AiSource {
    /// Answer a task-named query.
    ///
    /// # Errors
    ///
    /// Gateway errors pass through; the scripted oracle never fails.
    pub async fn query(&self, task: &str, template: &str, subs: &Value) -> Result<Value, AiError> {
        match self {
            Self::Gateway(gateway) => gateway.query(task, template, subs).await,
            Self::Scripted(oracle) => Ok(oracle.answer(task, subs)),
        }
    }

    /// Whether the underlying source has tripped its health flag.
    pub fn is_unhealthy(&self) -> bool {
        match self {
            Self::Gateway(gateway) => gateway.is_unhealthy(),
            Self::Scripted(_) => false,
        }
    }
}

/// Deterministic answers for every task, used when no LLM endpoint is
/// configured and by the test suite.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    /// Optional per-task overrides (task name -> canned value).
    pub overrides: BTreeMap<String, Value>,
}

impl ScriptedOracle {
    /// An oracle with a canned value for one task.
    pub fn with_override(task: &str, value: Value) -> Self {
        let mut overrides = BTreeMap::new();
        overrides.insert(task.to_owned(), value);
        Self { overrides }
    }

    /// Produce the canned answer for a task.
    pub fn answer(&self, task: &str, subs: &Value) -> Value {
        if let Some(value) = self.overrides.get(task) {
            return value.clone();
        }
        let name = subs
            .get("avatar")
            .and_then(|avatar| avatar.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("the cultivator");
        match task {
            "decide" => json!({
                "plans": [{"action": "cultivate", "params": {"months": 3}}],
                "thinking": format!("{name} settles down to steady practice."),
                "short_term_objective": "circulate qi and grow stronger",
            }),
            "goal" => json!({"objective": "advance to the next realm before age catches up"}),
            "relation" => json!({"new_relation": "friend"}),
            "nickname" => json!({"nickname": "the Steadfast"}),
            "backstory" => json!({
                "backstory": format!("{name} was born in a mountain hamlet and left home young to seek the dao."),
            }),
            "story" => {
                let seed = subs.get("seed").and_then(Value::as_str).unwrap_or("something stirred");
                json!({"story": format!("Word spread through the region: {seed}.")})
            }
            _ => json!({}),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed decision shapes
// ---------------------------------------------------------------------------

/// The decide query's answer: a plan chain plus the avatar's inner
/// state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDecision {
    /// Plans to enqueue, already validated against the registry.
    pub plans: Vec<ActionPlan>,
    /// Thinking text to store on the avatar.
    pub thinking: String,
    /// New short-term objective.
    pub short_term_objective: String,
}

/// Interpret a decide answer. Unknown actions are dropped; an answer
/// with no usable plans yields an empty decision (the avatar idles).
pub fn parse_plan_decision(value: &Value) -> PlanDecision {
    let mut decision = PlanDecision {
        thinking: value
            .get("thinking")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        short_term_objective: value
            .get("short_term_objective")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        plans: Vec::new(),
    };
    let Some(raw_plans) = value.get("plans").and_then(Value::as_array) else {
        return decision;
    };
    for raw in raw_plans {
        let Some(action) = raw.get("action").and_then(Value::as_str) else {
            continue;
        };
        if meta_for(action).is_none() {
            continue;
        }
        let params: BTreeMap<String, Value> = raw
            .get("params")
            .and_then(Value::as_object)
            .map(|object| object.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        decision.plans.push(ActionPlan {
            name: action.to_owned(),
            params,
        });
    }
    decision
}

/// The relation resolver's answer for one pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationDecision {
    /// A relation to add, from the initiator's viewpoint.
    pub new_relation: Option<RelationKind>,
    /// A relation to cancel.
    pub cancel_relation: Option<RelationKind>,
}

/// Interpret a relation answer. Unknown or derived labels are ignored.
pub fn parse_relation_decision(value: &Value) -> RelationDecision {
    let read = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .and_then(RelationKind::parse_label)
            .filter(|kind| !kind.is_derived())
    };
    RelationDecision {
        new_relation: read("new_relation"),
        cancel_relation: read("cancel_relation"),
    }
}

/// Interpret a single-string answer (`goal`, `nickname`, `backstory`,
/// `story`), rejecting empty strings.
pub fn parse_text_answer(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

// ---------------------------------------------------------------------------
// Context builders
// ---------------------------------------------------------------------------

/// World-level substitutions shared by every prompt.
pub fn world_context(world: &World) -> Value {
    json!({
        "year": world.year(),
        "month": world.stamp.month_number(),
        "phenomenon": world.phenomenon.as_ref().map(|p| json!({
            "name": p.name,
            "description": p.description,
        })),
        "history": world.history,
    })
}

/// Per-avatar substitutions for single-avatar tasks.
pub fn avatar_context(world: &World, id: AvatarId) -> Value {
    let Some(avatar) = world.store.get(id) else {
        return json!({});
    };
    let sect_name = avatar
        .sect
        .and_then(|sect_id| world.sects.get(&sect_id))
        .map(|sect| sect.name.clone());
    let relations: Vec<Value> = avatar
        .relations
        .iter()
        .filter_map(|(target, kind)| {
            world.store.get(*target).map(|other| {
                json!({"name": other.name, "label": kind.label(), "dead": other.is_dead})
            })
        })
        .take(12)
        .collect();
    let known_regions: Vec<String> = avatar
        .known_regions
        .iter()
        .filter_map(|region_id| world.regions.get(region_id).map(|region| region.name.clone()))
        .collect();

    let mut context = world_context(world);
    if let Some(object) = context.as_object_mut() {
        object.insert(
            "avatar".to_owned(),
            json!({
                "id": avatar.id,
                "name": avatar.name,
                "gender": avatar.gender,
                "level": avatar.level(),
                "realm": avatar.realm().display_name(),
                "age_years": avatar.age_years(),
                "hp": {"cur": avatar.hp.cur, "max": avatar.hp.max},
                "spirit_stones": avatar.spirit_stones,
                "position": {"x": avatar.pos.0, "y": avatar.pos.1},
                "sect": sect_name,
                "alignment": avatar.alignment,
                "personas": avatar.personas,
                "nickname": avatar.nickname,
                "short_term_objective": avatar.short_term_objective,
                "long_term_objective": avatar.long_term_objective.as_ref().map(|o| o.text.clone()),
                "thinking": avatar.thinking,
                "relations": relations,
                "known_regions": known_regions,
            }),
        );
    }
    context
}

/// Substitutions for the relation resolver: both sides plus the legal
/// moves.
pub fn pair_context(world: &World, a: AvatarId, b: AvatarId) -> Value {
    let possible_new: Vec<&str> = xiuxian_avatars::relations::possible_new_relations(&world.store, a, b)
        .into_iter()
        .map(RelationKind::label)
        .collect();
    let possible_cancel: Vec<&str> =
        xiuxian_avatars::relations::possible_cancel_relations(&world.store, a, b)
            .into_iter()
            .map(RelationKind::label)
            .collect();
    let existing = xiuxian_avatars::relations::get_relation(&world.store, a, b).map(RelationKind::label);

    let mut context = avatar_context(world, a);
    if let Some(object) = context.as_object_mut() {
        if let Some(other) = world.store.get(b) {
            object.insert(
                "other".to_owned(),
                json!({
                    "id": other.id,
                    "name": other.name,
                    "level": other.level(),
                    "realm": other.realm().display_name(),
                    "gender": other.gender,
                }),
            );
        }
        object.insert("existing_relation".to_owned(), json!(existing));
        object.insert("possible_new_relations".to_owned(), json!(possible_new));
        object.insert("possible_cancel_relations".to_owned(), json!(possible_cancel));
    }
    context
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use xiuxian_avatars::Avatar;
    use xiuxian_types::{Gender, MonthStamp};

    use super::*;

    #[test]
    fn scripted_decide_produces_valid_plans() {
        let oracle = ScriptedOracle::default();
        let answer = oracle.answer("decide", &json!({"avatar": {"name": "Li Chen"}}));
        let decision = parse_plan_decision(&answer);
        assert_eq!(decision.plans.len(), 1);
        assert_eq!(decision.plans.first().unwrap().name, "cultivate");
        assert!(!decision.thinking.is_empty());
    }

    #[test]
    fn overrides_replace_canned_answers() {
        let oracle = ScriptedOracle::with_override("relation", json!({"cancel_relation": "friend"}));
        let answer = oracle.answer("relation", &json!({}));
        let decision = parse_relation_decision(&answer);
        assert_eq!(decision.cancel_relation, Some(RelationKind::Friend));
        assert_eq!(decision.new_relation, None);
    }

    #[test]
    fn unknown_actions_are_dropped() {
        let value = json!({
            "plans": [
                {"action": "transcend", "params": {}},
                {"action": "forage", "params": {"months": 2}},
            ],
            "thinking": "t",
            "short_term_objective": "s",
        });
        let decision = parse_plan_decision(&value);
        assert_eq!(decision.plans.len(), 1);
        assert_eq!(decision.plans.first().unwrap().name, "forage");
    }

    #[test]
    fn derived_labels_are_not_accepted_from_the_model() {
        let value = json!({"new_relation": "martial_sibling"});
        let decision = parse_relation_decision(&value);
        assert_eq!(decision.new_relation, None);
    }

    #[test]
    fn text_answers_reject_blank() {
        assert_eq!(parse_text_answer(&json!({"nickname": "   "}), "nickname"), None);
        assert_eq!(
            parse_text_answer(&json!({"nickname": "Sword Demon"}), "nickname"),
            Some("Sword Demon".to_owned())
        );
    }

    #[test]
    fn avatar_context_carries_world_and_self() {
        let mut world = crate::world::World::for_tests();
        let avatar = Avatar::new("Li Chen", Gender::Male, MonthStamp(0), 35, (3, 4));
        let id = avatar.id;
        world.store.register(avatar, false);

        let context = avatar_context(&world, id);
        assert_eq!(context.get("year").and_then(Value::as_u64), Some(100));
        let avatar_value = context.get("avatar").unwrap();
        assert_eq!(avatar_value.get("name").and_then(Value::as_str), Some("Li Chen"));
        assert_eq!(
            avatar_value.get("realm").and_then(Value::as_str),
            Some("Foundation Establishment")
        );
    }
}
