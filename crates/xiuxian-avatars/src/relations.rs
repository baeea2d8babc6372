//! The asserted relation graph and the yearly derived refresh.
//!
//! Edges live on each avatar as an id-keyed adjacency map; every write
//! goes through [`set_relation`] which maintains the reciprocal
//! invariant: for every stored edge A→B with label L, B→A carries
//! `L.reciprocal()`. Callers serialize pair edits by performing them
//! after the relation-evolution join, one at a time.
//!
//! Becoming someone's master or disciple auto-enrolls the student into
//! the master's sect. The enroll is transactional with the edge write:
//! either both apply or neither does.

use std::collections::BTreeMap;

use tracing::debug;
use xiuxian_types::{AvatarId, MonthStamp, RelationKind, SectId, SectRank};
use xiuxian_world::Sect;

use crate::AvatarError;
use crate::store::EntityStore;

/// Minimum level gap for a master/disciple bond.
pub const MASTER_LEVEL_GAP: u32 = 20;

/// A sect enrollment computed as part of a relation write.
struct SectJoin {
    student: AvatarId,
    sect: SectId,
    rank: SectRank,
    previous_sect: Option<SectId>,
}

/// Write the edge A→B = `kind` and its reciprocal B→A.
///
/// For `Lover`, records the relation start stamp on both sides. For
/// `Master`/`Disciple`, enrolls the student into the master's sect when
/// the two differ, at a rank derived from the student's realm -- all
/// applied atomically with the edge write.
///
/// # Errors
///
/// Returns [`AvatarError::RelationRejected`] when the endpoints match,
/// either id is unknown, the label is derived-only, or the sect join
/// target does not exist.
pub fn set_relation(
    store: &mut EntityStore,
    sects: &mut BTreeMap<SectId, Sect>,
    a: AvatarId,
    b: AvatarId,
    kind: RelationKind,
    now: MonthStamp,
) -> Result<(), AvatarError> {
    if a == b {
        return Err(rejected(a, b, "an avatar cannot relate to itself"));
    }
    if kind.is_derived() {
        return Err(rejected(a, b, "derived labels are never asserted"));
    }
    if store.get(a).is_none() || store.get(b).is_none() {
        return Err(rejected(a, b, "unknown avatar"));
    }

    // Decide the sect join up-front so the whole edit is all-or-nothing.
    let join = compute_sect_join(store, a, b, kind);
    if let Some(join) = &join
        && !sects.contains_key(&join.sect)
    {
        return Err(rejected(a, b, "sect join target does not exist"));
    }

    let _ = store.with_pair_mut(a, b, |avatar_a, avatar_b| {
        avatar_a.relations.insert(b, kind);
        avatar_b.relations.insert(a, kind.reciprocal());
        if kind == RelationKind::Lover {
            avatar_a.relation_started.insert(b, now);
            avatar_b.relation_started.insert(a, now);
        }
    });

    if let Some(join) = join {
        apply_sect_join(store, sects, &join);
        debug!(student = %join.student, sect = %join.sect, rank = %join.rank, "sect auto-enroll");
    }
    Ok(())
}

/// The asserted label A→B, if any. Derived labels are never here;
/// callers wanting them consult `computed_relations`.
pub fn get_relation(store: &EntityStore, a: AvatarId, b: AvatarId) -> Option<RelationKind> {
    store.get(a).and_then(|avatar| avatar.relations.get(&b).copied())
}

/// Delete the edge in both directions, along with any start stamps.
pub fn clear_relation(store: &mut EntityStore, a: AvatarId, b: AvatarId) {
    let _ = store.with_pair_mut(a, b, |avatar_a, avatar_b| {
        avatar_a.relations.remove(&b);
        avatar_a.relation_started.remove(&b);
        avatar_b.relations.remove(&a);
        avatar_b.relation_started.remove(&a);
    });
}

/// Cancel a specific non-innate relation. Fails (returning `false`)
/// when the stored label differs or the label is innate.
pub fn cancel_relation(
    store: &mut EntityStore,
    a: AvatarId,
    b: AvatarId,
    kind: RelationKind,
) -> bool {
    if kind.is_innate() {
        return false;
    }
    if get_relation(store, a, b) != Some(kind) {
        return false;
    }
    clear_relation(store, a, b);
    true
}

/// Labels that could legally be added on the edge A→B, from A's
/// viewpoint. Innate labels are never offered.
pub fn possible_new_relations(store: &EntityStore, a: AvatarId, b: AvatarId) -> Vec<RelationKind> {
    let (Some(avatar_a), Some(avatar_b)) = (store.get(a), store.get(b)) else {
        return Vec::new();
    };
    let existing = avatar_a.relations.get(&b).copied();
    let mut candidates = Vec::new();

    if existing != Some(RelationKind::Friend) {
        candidates.push(RelationKind::Friend);
    }
    if existing != Some(RelationKind::Enemy) {
        candidates.push(RelationKind::Enemy);
    }
    if avatar_a.gender != avatar_b.gender && existing != Some(RelationKind::Lover) {
        candidates.push(RelationKind::Lover);
    }
    if existing != Some(RelationKind::SwornSibling) {
        candidates.push(RelationKind::SwornSibling);
    }
    if avatar_b.level() >= avatar_a.level().saturating_add(MASTER_LEVEL_GAP)
        && existing != Some(RelationKind::Master)
    {
        candidates.push(RelationKind::Master);
    }
    if avatar_b.level().saturating_add(MASTER_LEVEL_GAP) <= avatar_a.level()
        && existing != Some(RelationKind::Disciple)
    {
        candidates.push(RelationKind::Disciple);
    }
    candidates
}

/// Labels that could legally be cancelled on the edge A→B (the stored
/// label, when it is not innate).
pub fn possible_cancel_relations(
    store: &EntityStore,
    a: AvatarId,
    b: AvatarId,
) -> Vec<RelationKind> {
    match get_relation(store, a, b) {
        Some(kind) if !kind.is_innate() => vec![kind],
        _ => Vec::new(),
    }
}

/// Recompute the derived-relations snapshot for one avatar from
/// first-order edges:
///
/// - sibling: children of my parents, excluding me
/// - grand-parent: parents of my parents
/// - grand-child: children of my children
/// - martial-sibling: disciples of my masters, excluding me
/// - martial-grandmaster: masters of my masters
/// - martial-grandchild: disciples of my disciples
pub fn refresh_computed_relations(store: &mut EntityStore, id: AvatarId) {
    let Some(avatar) = store.get(id) else {
        return;
    };

    let mut parents = Vec::new();
    let mut children = Vec::new();
    let mut masters = Vec::new();
    let mut disciples = Vec::new();
    for (&target, &kind) in &avatar.relations {
        match kind {
            RelationKind::Parent => parents.push(target),
            RelationKind::Child => children.push(target),
            RelationKind::Master => masters.push(target),
            RelationKind::Disciple => disciples.push(target),
            _ => {}
        }
    }

    let mut computed: BTreeMap<AvatarId, RelationKind> = BTreeMap::new();
    let collect = |via: &[AvatarId],
                   wanted: RelationKind,
                   derived: RelationKind,
                   exclude_self: bool,
                   computed: &mut BTreeMap<AvatarId, RelationKind>| {
        for &mid in via {
            let Some(intermediate) = store.get(mid) else {
                continue;
            };
            for (&target, &kind) in &intermediate.relations {
                if kind == wanted && !(exclude_self && target == id) {
                    computed.insert(target, derived);
                }
            }
        }
    };

    collect(&parents, RelationKind::Child, RelationKind::Sibling, true, &mut computed);
    collect(&parents, RelationKind::Parent, RelationKind::GrandParent, false, &mut computed);
    collect(&children, RelationKind::Child, RelationKind::GrandChild, false, &mut computed);
    collect(&masters, RelationKind::Disciple, RelationKind::MartialSibling, true, &mut computed);
    collect(&masters, RelationKind::Master, RelationKind::MartialGrandmaster, false, &mut computed);
    collect(&disciples, RelationKind::Disciple, RelationKind::MartialGrandchild, false, &mut computed);

    if let Some(avatar) = store.get_mut(id) {
        avatar.computed_relations = computed;
    }
}

/// Compute the sect enrollment implied by a master/disciple edge, if
/// any. `Master` means "B is A's master": A joins B's sect. `Disciple`
/// means "B is A's disciple": B joins A's sect.
fn compute_sect_join(
    store: &EntityStore,
    a: AvatarId,
    b: AvatarId,
    kind: RelationKind,
) -> Option<SectJoin> {
    let (master, student) = match kind {
        RelationKind::Master => (b, a),
        RelationKind::Disciple => (a, b),
        _ => return None,
    };
    let master_sect = store.get(master)?.sect?;
    let student_avatar = store.get(student)?;
    if student_avatar.sect == Some(master_sect) {
        return None;
    }
    Some(SectJoin {
        student,
        sect: master_sect,
        rank: SectRank::from_realm(student_avatar.realm()),
        previous_sect: student_avatar.sect,
    })
}

/// Apply a computed sect enrollment.
fn apply_sect_join(store: &mut EntityStore, sects: &mut BTreeMap<SectId, Sect>, join: &SectJoin) {
    if let Some(previous) = join.previous_sect
        && let Some(sect) = sects.get_mut(&previous)
    {
        sect.expel(join.student);
    }
    if let Some(sect) = sects.get_mut(&join.sect) {
        sect.admit(join.student, join.rank);
    }
    if let Some(avatar) = store.get_mut(join.student) {
        avatar.sect = Some(join.sect);
        avatar.sect_rank = Some(join.rank);
    }
}

/// Construct a rejection error.
fn rejected(a: AvatarId, b: AvatarId, reason: &str) -> AvatarError {
    AvatarError::RelationRejected {
        a,
        b,
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use xiuxian_types::{Alignment, Gender};

    use super::*;
    use crate::avatar::Avatar;

    fn setup() -> (EntityStore, BTreeMap<SectId, Sect>) {
        (EntityStore::new(), BTreeMap::new())
    }

    fn add_avatar(store: &mut EntityStore, name: &str, gender: Gender, level: u32) -> AvatarId {
        let avatar = Avatar::new(name, gender, MonthStamp(0), level, (0, 0));
        let id = avatar.id;
        store.register(avatar, false);
        id
    }

    #[test]
    fn set_writes_both_directions() {
        let (mut store, mut sects) = setup();
        let a = add_avatar(&mut store, "A", Gender::Male, 10);
        let b = add_avatar(&mut store, "B", Gender::Female, 10);

        set_relation(&mut store, &mut sects, a, b, RelationKind::Friend, MonthStamp(5)).unwrap();
        assert_eq!(get_relation(&store, a, b), Some(RelationKind::Friend));
        assert_eq!(get_relation(&store, b, a), Some(RelationKind::Friend));
    }

    #[test]
    fn directed_labels_get_their_reciprocal() {
        let (mut store, mut sects) = setup();
        let parent = add_avatar(&mut store, "P", Gender::Female, 40);
        let child = add_avatar(&mut store, "C", Gender::Male, 1);

        // "B is A's child" written from the parent's viewpoint.
        set_relation(&mut store, &mut sects, parent, child, RelationKind::Child, MonthStamp(0))
            .unwrap();
        assert_eq!(get_relation(&store, parent, child), Some(RelationKind::Child));
        assert_eq!(get_relation(&store, child, parent), Some(RelationKind::Parent));
    }

    #[test]
    fn lover_records_start_stamp_on_both_sides() {
        let (mut store, mut sects) = setup();
        let a = add_avatar(&mut store, "A", Gender::Male, 10);
        let b = add_avatar(&mut store, "B", Gender::Female, 12);
        let stamp = MonthStamp(77);

        set_relation(&mut store, &mut sects, a, b, RelationKind::Lover, stamp).unwrap();
        assert_eq!(store.get(a).unwrap().relation_started.get(&b), Some(&stamp));
        assert_eq!(store.get(b).unwrap().relation_started.get(&a), Some(&stamp));
    }

    #[test]
    fn acknowledging_a_master_joins_their_sect() {
        let (mut store, mut sects) = setup();
        let student = add_avatar(&mut store, "Student", Gender::Male, 5);
        let master = add_avatar(&mut store, "Master", Gender::Female, 70);

        let mut sect = Sect::new("Heavenly Sword Sect", Alignment::Righteous, "Blades.");
        let sect_id = sect.id;
        sect.admit(master, SectRank::Elder);
        sects.insert(sect_id, sect);
        store.get_mut(master).unwrap().sect = Some(sect_id);

        set_relation(&mut store, &mut sects, student, master, RelationKind::Master, MonthStamp(1))
            .unwrap();

        assert_eq!(get_relation(&store, student, master), Some(RelationKind::Master));
        assert_eq!(get_relation(&store, master, student), Some(RelationKind::Disciple));
        let student_avatar = store.get(student).unwrap();
        assert_eq!(student_avatar.sect, Some(sect_id));
        // Qi Refinement student enters as an outer disciple.
        assert_eq!(student_avatar.sect_rank, Some(SectRank::OuterDisciple));
        assert!(sects.get(&sect_id).unwrap().has_member(student));
    }

    #[test]
    fn missing_sect_rejects_the_whole_edit() {
        let (mut store, mut sects) = setup();
        let student = add_avatar(&mut store, "Student", Gender::Male, 5);
        let master = add_avatar(&mut store, "Master", Gender::Female, 70);
        // Master claims a sect that is not registered anywhere.
        store.get_mut(master).unwrap().sect = Some(SectId::new());

        let result =
            set_relation(&mut store, &mut sects, student, master, RelationKind::Master, MonthStamp(1));
        assert!(result.is_err());
        // Nothing was written: no edge, no membership.
        assert_eq!(get_relation(&store, student, master), None);
        assert_eq!(store.get(student).unwrap().sect, None);
    }

    #[test]
    fn cancel_refuses_innate_labels() {
        let (mut store, mut sects) = setup();
        let parent = add_avatar(&mut store, "P", Gender::Female, 40);
        let child = add_avatar(&mut store, "C", Gender::Male, 1);
        set_relation(&mut store, &mut sects, parent, child, RelationKind::Child, MonthStamp(0))
            .unwrap();

        assert!(!cancel_relation(&mut store, parent, child, RelationKind::Child));
        assert_eq!(get_relation(&store, parent, child), Some(RelationKind::Child));
    }

    #[test]
    fn cancel_removes_matching_social_labels() {
        let (mut store, mut sects) = setup();
        let a = add_avatar(&mut store, "A", Gender::Male, 10);
        let b = add_avatar(&mut store, "B", Gender::Male, 10);
        set_relation(&mut store, &mut sects, a, b, RelationKind::Enemy, MonthStamp(0)).unwrap();

        // Wrong label: refused.
        assert!(!cancel_relation(&mut store, a, b, RelationKind::Friend));
        assert!(cancel_relation(&mut store, a, b, RelationKind::Enemy));
        assert_eq!(get_relation(&store, a, b), None);
        assert_eq!(get_relation(&store, b, a), None);
    }

    #[test]
    fn possible_new_never_offers_innate() {
        let (mut store, _) = setup();
        let a = add_avatar(&mut store, "A", Gender::Male, 10);
        let b = add_avatar(&mut store, "B", Gender::Female, 50);

        let candidates = possible_new_relations(&store, a, b);
        assert!(candidates.iter().all(|kind| !kind.is_innate()));
        // Level gap of 40 makes B a possible master, not a disciple.
        assert!(candidates.contains(&RelationKind::Master));
        assert!(!candidates.contains(&RelationKind::Disciple));
        // Opposite genders allow lovers.
        assert!(candidates.contains(&RelationKind::Lover));
    }

    #[test]
    fn possible_new_excludes_existing_and_same_gender_lovers() {
        let (mut store, mut sects) = setup();
        let a = add_avatar(&mut store, "A", Gender::Male, 10);
        let b = add_avatar(&mut store, "B", Gender::Male, 10);
        set_relation(&mut store, &mut sects, a, b, RelationKind::Friend, MonthStamp(0)).unwrap();

        let candidates = possible_new_relations(&store, a, b);
        assert!(!candidates.contains(&RelationKind::Friend));
        assert!(!candidates.contains(&RelationKind::Lover));
        assert!(candidates.contains(&RelationKind::Enemy));
    }

    #[test]
    fn derived_siblings_from_shared_parent() {
        let (mut store, mut sects) = setup();
        let parent = add_avatar(&mut store, "P", Gender::Female, 60);
        let a = add_avatar(&mut store, "A", Gender::Male, 5);
        let b = add_avatar(&mut store, "B", Gender::Female, 5);
        set_relation(&mut store, &mut sects, parent, a, RelationKind::Child, MonthStamp(0)).unwrap();
        set_relation(&mut store, &mut sects, parent, b, RelationKind::Child, MonthStamp(0)).unwrap();

        refresh_computed_relations(&mut store, a);
        refresh_computed_relations(&mut store, b);

        assert_eq!(
            store.get(a).unwrap().computed_relations.get(&b),
            Some(&RelationKind::Sibling)
        );
        assert_eq!(
            store.get(b).unwrap().computed_relations.get(&a),
            Some(&RelationKind::Sibling)
        );
        // The asserted graph is untouched.
        assert_eq!(get_relation(&store, a, b), None);
    }

    #[test]
    fn derived_martial_lineage() {
        let (mut store, mut sects) = setup();
        let grandmaster = add_avatar(&mut store, "GM", Gender::Male, 90);
        let master = add_avatar(&mut store, "M", Gender::Male, 60);
        let disciple = add_avatar(&mut store, "D", Gender::Female, 20);
        set_relation(&mut store, &mut sects, master, grandmaster, RelationKind::Master, MonthStamp(0))
            .unwrap();
        set_relation(&mut store, &mut sects, disciple, master, RelationKind::Master, MonthStamp(0))
            .unwrap();

        refresh_computed_relations(&mut store, disciple);
        refresh_computed_relations(&mut store, grandmaster);

        assert_eq!(
            store.get(disciple).unwrap().computed_relations.get(&grandmaster),
            Some(&RelationKind::MartialGrandmaster)
        );
        assert_eq!(
            store.get(grandmaster).unwrap().computed_relations.get(&disciple),
            Some(&RelationKind::MartialGrandchild)
        );
    }

    #[test]
    fn derived_labels_cannot_be_asserted() {
        let (mut store, mut sects) = setup();
        let a = add_avatar(&mut store, "A", Gender::Male, 10);
        let b = add_avatar(&mut store, "B", Gender::Male, 10);
        let result =
            set_relation(&mut store, &mut sects, a, b, RelationKind::MartialSibling, MonthStamp(0));
        assert!(result.is_err());
    }
}
