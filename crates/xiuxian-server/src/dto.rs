//! Wire shapes for the REST and WebSocket surface.
//!
//! DTOs are built from the world after each tick and held in the
//! shared snapshot, so request handlers never need to reach into live
//! engine state. Names are resolved at build time; the UI never sees a
//! bare id without its display name next to it.

use serde::Serialize;
use xiuxian_avatars::Avatar;
use xiuxian_core::World;
use xiuxian_types::{Alignment, AvatarId, Event, Gender, RegionId, SectId};
use xiuxian_world::{Region, RegionKind, Sect};

/// A compact avatar row for the state endpoint and map overlays.
#[derive(Debug, Clone, Serialize)]
pub struct AvatarSummary {
    /// Stable id.
    pub id: AvatarId,
    /// Display name.
    pub name: String,
    /// Earned nickname, if any.
    pub nickname: Option<String>,
    /// Gender.
    pub gender: Gender,
    /// Cultivation level.
    pub level: u32,
    /// Realm display name.
    pub realm: String,
    /// Tile position.
    pub pos: (u32, u32),
    /// Current / max hit points.
    pub hp: (i64, i64),
    /// Whether the avatar is dead.
    pub is_dead: bool,
    /// Sect name, if any.
    pub sect_name: Option<String>,
    /// Emoji of the current action, if any.
    pub action_emoji: Option<String>,
    /// Display string of the current action, if any.
    pub action_display: Option<String>,
}

/// One relation row in an avatar detail.
#[derive(Debug, Clone, Serialize)]
pub struct RelationDto {
    /// The other avatar.
    pub id: AvatarId,
    /// The other avatar's name.
    pub name: String,
    /// The label from this avatar's viewpoint.
    pub label: String,
    /// Whether the other avatar is dead.
    pub dead: bool,
}

/// Full avatar detail for the detail endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AvatarDetail {
    /// The summary row.
    #[serde(flatten)]
    pub summary: AvatarSummary,
    /// Age in whole years.
    pub age_years: u64,
    /// Spirit stone count.
    pub spirit_stones: i64,
    /// Moral alignment.
    pub alignment: Alignment,
    /// Personality descriptors.
    pub personas: Vec<String>,
    /// Short-term objective.
    pub short_term_objective: String,
    /// Long-term objective text, if set.
    pub long_term_objective: Option<String>,
    /// Latest thinking text.
    pub thinking: String,
    /// Generated backstory, if any.
    pub backstory: Option<String>,
    /// Asserted relations.
    pub relations: Vec<RelationDto>,
    /// Derived relations from the yearly snapshot.
    pub computed_relations: Vec<RelationDto>,
    /// Names of hosted regions.
    pub owned_regions: Vec<String>,
    /// Material bag.
    pub bag: Vec<(String, u32)>,
    /// Equipped weapon template, if any.
    pub weapon: Option<String>,
    /// Equipped auxiliary template, if any.
    pub auxiliary: Option<String>,
    /// Active technique template, if any.
    pub technique: Option<String>,
    /// Death description, once dead.
    pub death: Option<String>,
}

/// A region row.
#[derive(Debug, Clone, Serialize)]
pub struct RegionDto {
    /// Stable id.
    pub id: RegionId,
    /// Display name.
    pub name: String,
    /// Kind as a lowercase tag.
    pub kind: String,
    /// Center tile.
    pub center: (u32, u32),
    /// Stamped extent.
    pub extent: u32,
    /// Host avatar name (grottos).
    pub host_name: Option<String>,
    /// Anchored sect name (headquarters).
    pub sect_name: Option<String>,
    /// Prosperity (cities).
    pub prosperity: i64,
}

/// One sect member row.
#[derive(Debug, Clone, Serialize)]
pub struct SectMemberDto {
    /// Member id.
    pub id: AvatarId,
    /// Member name.
    pub name: String,
    /// Rank display name.
    pub rank: String,
}

/// A sect detail.
#[derive(Debug, Clone, Serialize)]
pub struct SectDto {
    /// Stable id.
    pub id: SectId,
    /// Display name.
    pub name: String,
    /// Alignment.
    pub alignment: Alignment,
    /// Flavor description.
    pub description: String,
    /// Leader name, if any.
    pub leader_name: Option<String>,
    /// Members and ranks.
    pub members: Vec<SectMemberDto>,
    /// Headquarters region name, if any.
    pub hq_name: Option<String>,
}

/// The static map, served once.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MapDto {
    /// Width in tiles.
    pub width: u32,
    /// Height in tiles.
    pub height: u32,
    /// All regions.
    pub regions: Vec<RegionDto>,
}

/// The phenomenon block in the state endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PhenomenonDto {
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Duration in years.
    pub duration_years: u64,
}

/// The whole-state response.
#[derive(Debug, Clone, Serialize)]
pub struct StateDto {
    /// Calendar year.
    pub year: u64,
    /// Month number (1..=12).
    pub month: u64,
    /// Whether ticking is paused.
    pub paused: bool,
    /// Whether the LLM gateway is unhealthy.
    pub llm_unhealthy: bool,
    /// All avatars.
    pub avatars: Vec<AvatarSummary>,
    /// Active phenomenon.
    pub phenomenon: Option<PhenomenonDto>,
    /// Recent events, newest first.
    pub recent_events: Vec<Event>,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Lowercase tag for a region kind.
pub const fn region_kind_tag(kind: RegionKind) -> &'static str {
    match kind {
        RegionKind::City => "city",
        RegionKind::SectHq => "sect_hq",
        RegionKind::Grotto => "grotto",
        RegionKind::Wild => "wild",
    }
}

/// Build a summary row from an avatar.
pub fn avatar_summary(world: &World, avatar: &Avatar) -> AvatarSummary {
    AvatarSummary {
        id: avatar.id,
        name: avatar.name.clone(),
        nickname: avatar.nickname.clone(),
        gender: avatar.gender,
        level: avatar.level(),
        realm: avatar.realm().display_name().to_owned(),
        pos: avatar.pos,
        hp: (avatar.hp.cur, avatar.hp.max),
        is_dead: avatar.is_dead,
        sect_name: avatar
            .sect
            .and_then(|sect_id| world.sects.get(&sect_id))
            .map(|sect| sect.name.clone()),
        action_emoji: avatar
            .current_action
            .as_ref()
            .map(|instance| instance.meta().emoji.to_owned()),
        action_display: avatar
            .current_action
            .as_ref()
            .map(|instance| instance.meta().display.to_owned()),
    }
}

/// Build the full detail for an avatar.
pub fn avatar_detail(world: &World, avatar: &Avatar) -> AvatarDetail {
    let relation_rows = |map: &std::collections::BTreeMap<AvatarId, xiuxian_types::RelationKind>| {
        map.iter()
            .filter_map(|(&target, &kind)| {
                world.store.get(target).map(|other| RelationDto {
                    id: target,
                    name: other.name.clone(),
                    label: kind.label().to_owned(),
                    dead: other.is_dead,
                })
            })
            .collect::<Vec<_>>()
    };

    AvatarDetail {
        summary: avatar_summary(world, avatar),
        age_years: avatar.age_years(),
        spirit_stones: avatar.spirit_stones,
        alignment: avatar.alignment,
        personas: avatar.personas.clone(),
        short_term_objective: avatar.short_term_objective.clone(),
        long_term_objective: avatar.long_term_objective.as_ref().map(|o| o.text.clone()),
        thinking: avatar.thinking.clone(),
        backstory: avatar.backstory.clone(),
        relations: relation_rows(&avatar.relations),
        computed_relations: relation_rows(&avatar.computed_relations),
        owned_regions: avatar
            .owned_regions
            .iter()
            .filter_map(|region_id| world.regions.get(region_id).map(|r| r.name.clone()))
            .collect(),
        bag: avatar.bag.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        weapon: avatar.weapon.as_ref().map(|w| w.template.clone()),
        auxiliary: avatar.auxiliary.as_ref().map(|a| a.template.clone()),
        technique: avatar.technique.clone(),
        death: avatar
            .death_info
            .as_ref()
            .map(|info| format!("{} ({})", info.cause, info.stamp)),
    }
}

/// Build a region row.
pub fn region_dto(world: &World, region: &Region) -> RegionDto {
    RegionDto {
        id: region.id,
        name: region.name.clone(),
        kind: region_kind_tag(region.kind).to_owned(),
        center: region.center,
        extent: region.extent,
        host_name: region
            .host_avatar
            .and_then(|id| world.store.get(id))
            .map(|avatar| avatar.name.clone()),
        sect_name: region
            .sect
            .and_then(|sect_id| world.sects.get(&sect_id))
            .map(|sect| sect.name.clone()),
        prosperity: region.prosperity,
    }
}

/// Build a sect detail.
pub fn sect_dto(world: &World, sect: &Sect) -> SectDto {
    SectDto {
        id: sect.id,
        name: sect.name.clone(),
        alignment: sect.alignment,
        description: sect.description.clone(),
        leader_name: sect
            .leader
            .and_then(|id| world.store.get(id))
            .map(|avatar| avatar.name.clone()),
        members: sect
            .members
            .iter()
            .filter_map(|(&id, &rank)| {
                world.store.get(id).map(|avatar| SectMemberDto {
                    id,
                    name: avatar.name.clone(),
                    rank: rank.display_name().to_owned(),
                })
            })
            .collect(),
        hq_name: sect
            .hq_region
            .and_then(|region_id| world.regions.get(&region_id))
            .map(|region| region.name.clone()),
    }
}

/// Build the static map DTO.
pub fn map_dto(world: &World) -> MapDto {
    MapDto {
        width: world.map.width(),
        height: world.map.height(),
        regions: world.regions.values().map(|region| region_dto(world, region)).collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use xiuxian_types::{Gender, MonthStamp};
    use xiuxian_world::RegionKind;

    use super::*;

    #[test]
    fn summary_reflects_the_avatar() {
        let mut world = World::for_tests();
        let avatar = Avatar::new("Li Chen", Gender::Male, MonthStamp(0), 35, (3, 4));
        let id = avatar.id;
        world.store.register(avatar, false);

        let summary = avatar_summary(&world, world.store.get(id).unwrap());
        assert_eq!(summary.name, "Li Chen");
        assert_eq!(summary.realm, "Foundation Establishment");
        assert_eq!(summary.action_emoji, None);
    }

    #[test]
    fn map_dto_carries_every_region() {
        let mut world = World::for_tests();
        world.add_region(Region::new("Riverfall City", RegionKind::City, (8, 8), 2));
        world.add_region(Region::new("Azure Mist Grotto", RegionKind::Grotto, (20, 20), 1));

        let dto = map_dto(&world);
        assert_eq!(dto.width, 32);
        assert_eq!(dto.regions.len(), 2);
        assert!(dto.regions.iter().any(|r| r.kind == "grotto"));
    }

    #[test]
    fn detail_resolves_relation_names() {
        let mut world = World::for_tests();
        let a = Avatar::new("A", Gender::Male, MonthStamp(0), 10, (0, 0));
        let b = Avatar::new("B", Gender::Female, MonthStamp(0), 10, (0, 0));
        let (a_id, b_id) = (a.id, b.id);
        world.store.register(a, false);
        world.store.register(b, false);
        xiuxian_avatars::relations::set_relation(
            &mut world.store,
            &mut world.sects,
            a_id,
            b_id,
            xiuxian_types::RelationKind::Friend,
            MonthStamp(1),
        )
        .unwrap();

        let detail = avatar_detail(&world, world.store.get(a_id).unwrap());
        assert_eq!(detail.relations.len(), 1);
        assert_eq!(detail.relations.first().unwrap().name, "B");
        assert_eq!(detail.relations.first().unwrap().label, "friend");
    }
}
