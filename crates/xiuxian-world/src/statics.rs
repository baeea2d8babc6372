//! The immutable static-data bundle.
//!
//! All tabular game content -- sects, techniques, weapons, auxiliaries,
//! elixirs, phenomena, fortune and misfortune catalogues, name pools --
//! is loaded once at init from CSV files in the configured game-configs
//! directory and shared by reference for the lifetime of the world.
//! Templates are keyed by their name, which doubles as the stable id
//! that save files use to reattach item instances.
//!
//! Malformed tables are a startup-fatal configuration error; nothing
//! here fails silently.

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use xiuxian_types::Alignment;

use crate::WorldError;
use crate::phenomenon::CelestialPhenomenon;

/// A sect definition from `sects.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectTemplate {
    /// Sect name.
    pub name: String,
    /// Moral alignment.
    pub alignment: Alignment,
    /// Flavor description.
    pub description: String,
}

/// A cultivation technique template from `techniques.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueTemplate {
    /// Template name (stable id).
    pub name: String,
    /// Grade, 1 (common) to 5 (immortal).
    pub grade: u32,
    /// Minimum level required to practice it.
    pub min_level: u32,
    /// Power contribution to derived attributes.
    pub power: i64,
}

/// A weapon template from `weapons.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponTemplate {
    /// Template name (stable id).
    pub name: String,
    /// Grade, 1 (common) to 5 (immortal).
    pub grade: u32,
    /// Attack contribution to derived attributes.
    pub power: i64,
}

/// An auxiliary item template from `auxiliaries.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryTemplate {
    /// Template name (stable id).
    pub name: String,
    /// Grade, 1 (common) to 5 (immortal).
    pub grade: u32,
    /// Effect tag consumed by derived-attribute recompute.
    pub effect: String,
}

/// An elixir template from `elixirs.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElixirTemplate {
    /// Template name (stable id).
    pub name: String,
    /// Grade, 1 (common) to 5 (immortal).
    pub grade: u32,
    /// How long one dose stays active, in months.
    pub duration_months: u64,
    /// Effect tags applied while active.
    pub effects: BTreeMap<String, i64>,
}

/// What a fortune or misfortune does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FortuneKind {
    /// Grants a weapon (fortunes only).
    Weapon,
    /// Grants a technique (fortunes only).
    Technique,
    /// Grants spirit stones.
    SpiritStones,
    /// Grants levels of insight.
    Insight,
    /// Deals hp damage (misfortunes only).
    Injury,
    /// Steals spirit stones (misfortunes only).
    Theft,
    /// Inner demons: a lingering debuff (misfortunes only).
    HeartDemon,
}

/// One weighted entry in the fortune or misfortune catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FortuneRecord {
    /// Display name.
    pub name: String,
    /// Selection weight among eligible entries.
    pub weight: u32,
    /// Lowest avatar level this entry applies to.
    pub min_level: u32,
    /// Highest avatar level this entry applies to.
    pub max_level: u32,
    /// What happens on a hit.
    pub kind: FortuneKind,
    /// Magnitude of the effect (stones, damage, levels, or item grade
    /// ceiling depending on `kind`).
    pub magnitude: i64,
    /// Seed line handed to the story generator.
    pub narrative_seed: String,
}

/// Name pools for generated avatars and mortals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePool {
    /// Family names.
    pub surnames: Vec<String>,
    /// Male given names.
    pub male_given: Vec<String>,
    /// Female given names.
    pub female_given: Vec<String>,
}

impl NamePool {
    /// Compose a random full name for the given gender.
    pub fn random_name<R: Rng>(&self, gender: xiuxian_types::Gender, rng: &mut R) -> String {
        let surname = pick(&self.surnames, rng).map_or("Wu", String::as_str);
        let given_pool = match gender {
            xiuxian_types::Gender::Male => &self.male_given,
            xiuxian_types::Gender::Female => &self.female_given,
        };
        let given = pick(given_pool, rng).map_or("Ming", String::as_str);
        format!("{surname} {given}")
    }
}

/// Pick a random element of a slice, or `None` when empty.
fn pick<'a, T, R: Rng>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        items.get(rng.random_range(0..items.len()))
    }
}

/// The immutable bundle of all static game data.
///
/// Built once at init and passed by reference; a language switch reloads
/// the whole bundle and swaps it atomically at the world level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldData {
    /// Sect definitions in file order.
    pub sects: Vec<SectTemplate>,
    /// Technique templates keyed by name.
    pub techniques: BTreeMap<String, TechniqueTemplate>,
    /// Weapon templates keyed by name.
    pub weapons: BTreeMap<String, WeaponTemplate>,
    /// Auxiliary templates keyed by name.
    pub auxiliaries: BTreeMap<String, AuxiliaryTemplate>,
    /// Elixir templates keyed by name.
    pub elixirs: BTreeMap<String, ElixirTemplate>,
    /// Celestial phenomenon catalogue.
    pub phenomena: Vec<CelestialPhenomenon>,
    /// Fortune catalogue.
    pub fortunes: Vec<FortuneRecord>,
    /// Misfortune catalogue.
    pub misfortunes: Vec<FortuneRecord>,
    /// Name pools for generated people.
    pub names: NamePool,
}

// ---------------------------------------------------------------------------
// CSV row shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SectRow {
    name: String,
    alignment: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct TechniqueRow {
    name: String,
    grade: u32,
    min_level: u32,
    power: i64,
}

#[derive(Debug, Deserialize)]
struct WeaponRow {
    name: String,
    grade: u32,
    power: i64,
}

#[derive(Debug, Deserialize)]
struct AuxiliaryRow {
    name: String,
    grade: u32,
    effect: String,
}

#[derive(Debug, Deserialize)]
struct ElixirRow {
    name: String,
    grade: u32,
    duration_months: u64,
    effects: String,
}

#[derive(Debug, Deserialize)]
struct PhenomenonRow {
    name: String,
    duration_years: u64,
    description: String,
    effects: String,
}

#[derive(Debug, Deserialize)]
struct FortuneRow {
    name: String,
    weight: u32,
    min_level: u32,
    max_level: u32,
    kind: String,
    magnitude: i64,
    narrative_seed: String,
}

#[derive(Debug, Deserialize)]
struct NameRow {
    pool: String,
    value: String,
}

impl WorldData {
    /// Load the full bundle from CSV files in `dir`.
    ///
    /// Expects `sects.csv`, `techniques.csv`, `weapons.csv`,
    /// `auxiliaries.csv`, `elixirs.csv`, `phenomena.csv`,
    /// `fortunes.csv`, `misfortunes.csv`, and `names.csv`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::StaticData`] on a missing file, malformed
    /// row, or failed validation.
    pub fn load(dir: &Path) -> Result<Self, WorldError> {
        let sects = read_table::<SectRow>(dir, "sects.csv")?
            .into_iter()
            .map(|row| {
                Ok(SectTemplate {
                    alignment: parse_alignment(&row.alignment, "sects.csv")?,
                    name: row.name,
                    description: row.description,
                })
            })
            .collect::<Result<Vec<_>, WorldError>>()?;

        let techniques = read_table::<TechniqueRow>(dir, "techniques.csv")?
            .into_iter()
            .map(|row| {
                (
                    row.name.clone(),
                    TechniqueTemplate {
                        name: row.name,
                        grade: row.grade,
                        min_level: row.min_level,
                        power: row.power,
                    },
                )
            })
            .collect();

        let weapons = read_table::<WeaponRow>(dir, "weapons.csv")?
            .into_iter()
            .map(|row| {
                (
                    row.name.clone(),
                    WeaponTemplate {
                        name: row.name,
                        grade: row.grade,
                        power: row.power,
                    },
                )
            })
            .collect();

        let auxiliaries = read_table::<AuxiliaryRow>(dir, "auxiliaries.csv")?
            .into_iter()
            .map(|row| {
                (
                    row.name.clone(),
                    AuxiliaryTemplate {
                        name: row.name,
                        grade: row.grade,
                        effect: row.effect,
                    },
                )
            })
            .collect();

        let elixirs = read_table::<ElixirRow>(dir, "elixirs.csv")?
            .into_iter()
            .map(|row| {
                (
                    row.name.clone(),
                    ElixirTemplate {
                        effects: parse_effects(&row.effects),
                        name: row.name,
                        grade: row.grade,
                        duration_months: row.duration_months,
                    },
                )
            })
            .collect();

        let phenomena = read_table::<PhenomenonRow>(dir, "phenomena.csv")?
            .into_iter()
            .map(|row| CelestialPhenomenon {
                effects: parse_effects(&row.effects),
                name: row.name,
                description: row.description,
                duration_years: row.duration_years,
            })
            .collect();

        let fortunes = load_fortune_table(dir, "fortunes.csv")?;
        let misfortunes = load_fortune_table(dir, "misfortunes.csv")?;

        let mut names = NamePool::default();
        for row in read_table::<NameRow>(dir, "names.csv")? {
            match row.pool.as_str() {
                "surname" => names.surnames.push(row.value),
                "male" => names.male_given.push(row.value),
                "female" => names.female_given.push(row.value),
                other => {
                    return Err(WorldError::StaticData {
                        table: "names.csv".to_owned(),
                        reason: format!("unknown name pool: {other}"),
                    });
                }
            }
        }

        let data = Self {
            sects,
            techniques,
            weapons,
            auxiliaries,
            elixirs,
            phenomena,
            fortunes,
            misfortunes,
            names,
        };
        data.validate()?;
        Ok(data)
    }

    /// Validate cross-field constraints of the loaded bundle.
    fn validate(&self) -> Result<(), WorldError> {
        for record in self.fortunes.iter().chain(self.misfortunes.iter()) {
            if record.weight == 0 {
                return Err(WorldError::StaticData {
                    table: "fortunes.csv".to_owned(),
                    reason: format!("{}: weight must be positive", record.name),
                });
            }
            if record.max_level < record.min_level {
                return Err(WorldError::StaticData {
                    table: "fortunes.csv".to_owned(),
                    reason: format!("{}: max_level below min_level", record.name),
                });
            }
        }
        if self.names.surnames.is_empty()
            || self.names.male_given.is_empty()
            || self.names.female_given.is_empty()
        {
            return Err(WorldError::StaticData {
                table: "names.csv".to_owned(),
                reason: "all three name pools must be non-empty".to_owned(),
            });
        }
        Ok(())
    }

    /// A small built-in bundle for tests and headless development.
    pub fn minimal() -> Self {
        let mut techniques = BTreeMap::new();
        techniques.insert(
            "Azure Cloud Scripture".to_owned(),
            TechniqueTemplate {
                name: "Azure Cloud Scripture".to_owned(),
                grade: 2,
                min_level: 0,
                power: 10,
            },
        );
        let mut weapons = BTreeMap::new();
        weapons.insert(
            "Iron Sword".to_owned(),
            WeaponTemplate {
                name: "Iron Sword".to_owned(),
                grade: 1,
                power: 5,
            },
        );
        weapons.insert(
            "Starfall Saber".to_owned(),
            WeaponTemplate {
                name: "Starfall Saber".to_owned(),
                grade: 4,
                power: 60,
            },
        );
        let mut auxiliaries = BTreeMap::new();
        auxiliaries.insert(
            "Jade Pendant".to_owned(),
            AuxiliaryTemplate {
                name: "Jade Pendant".to_owned(),
                grade: 2,
                effect: "mind_calm".to_owned(),
            },
        );
        let mut elixirs = BTreeMap::new();
        elixirs.insert(
            "Qi Gathering Pill".to_owned(),
            ElixirTemplate {
                name: "Qi Gathering Pill".to_owned(),
                grade: 1,
                duration_months: 6,
                effects: BTreeMap::from([("cultivation_speed".to_owned(), 10)]),
            },
        );
        Self {
            sects: vec![
                SectTemplate {
                    name: "Heavenly Sword Sect".to_owned(),
                    alignment: Alignment::Righteous,
                    description: "Blades in the clouds.".to_owned(),
                },
                SectTemplate {
                    name: "Black Lotus Pavilion".to_owned(),
                    alignment: Alignment::Demonic,
                    description: "Whispers in the dark.".to_owned(),
                },
            ],
            techniques,
            weapons,
            auxiliaries,
            elixirs,
            phenomena: vec![
                CelestialPhenomenon {
                    name: "Spirit Tide".to_owned(),
                    description: "Spiritual qi surges across the land.".to_owned(),
                    effects: BTreeMap::from([("cultivation_speed".to_owned(), 20)]),
                    duration_years: 5,
                },
                CelestialPhenomenon {
                    name: "Heavenly Drought".to_owned(),
                    description: "Spiritual qi thins to a trickle.".to_owned(),
                    effects: BTreeMap::from([("cultivation_speed".to_owned(), -20)]),
                    duration_years: 3,
                },
            ],
            fortunes: vec![
                FortuneRecord {
                    name: "Ancient Cave Inheritance".to_owned(),
                    weight: 3,
                    min_level: 0,
                    max_level: 59,
                    kind: FortuneKind::Technique,
                    magnitude: 3,
                    narrative_seed: "a hidden cave with a fading inscription".to_owned(),
                },
                FortuneRecord {
                    name: "Meteoric Iron Find".to_owned(),
                    weight: 2,
                    min_level: 0,
                    max_level: 120,
                    kind: FortuneKind::Weapon,
                    magnitude: 3,
                    narrative_seed: "a fallen star glinting in a crater".to_owned(),
                },
                FortuneRecord {
                    name: "Merchant's Gratitude".to_owned(),
                    weight: 5,
                    min_level: 0,
                    max_level: 120,
                    kind: FortuneKind::SpiritStones,
                    magnitude: 200,
                    narrative_seed: "a rescued merchant repays a debt".to_owned(),
                },
            ],
            misfortunes: vec![
                FortuneRecord {
                    name: "Bandit Ambush".to_owned(),
                    weight: 4,
                    min_level: 0,
                    max_level: 59,
                    kind: FortuneKind::Theft,
                    magnitude: 100,
                    narrative_seed: "masked figures on a mountain road".to_owned(),
                },
                FortuneRecord {
                    name: "Qi Deviation".to_owned(),
                    weight: 2,
                    min_level: 0,
                    max_level: 120,
                    kind: FortuneKind::Injury,
                    magnitude: 30,
                    narrative_seed: "a moment of doubt during circulation".to_owned(),
                },
            ],
            names: NamePool {
                surnames: vec!["Li".to_owned(), "Han".to_owned(), "Xiao".to_owned(), "Mo".to_owned()],
                male_given: vec!["Chen".to_owned(), "Feng".to_owned(), "Yun".to_owned()],
                female_given: vec!["Qing".to_owned(), "Xue".to_owned(), "Rou".to_owned()],
            },
        }
    }
}

/// Read one CSV table from `dir/file` into typed rows.
fn read_table<T: serde::de::DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>, WorldError> {
    let path = dir.join(file);
    let mut reader = csv::Reader::from_path(&path).map_err(|e| WorldError::StaticData {
        table: file.to_owned(),
        reason: format!("open failed: {e}"),
    })?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: T = record.map_err(|e| WorldError::StaticData {
            table: file.to_owned(),
            reason: format!("bad row: {e}"),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Load and type a fortune/misfortune table.
fn load_fortune_table(dir: &Path, file: &str) -> Result<Vec<FortuneRecord>, WorldError> {
    read_table::<FortuneRow>(dir, file)?
        .into_iter()
        .map(|row| {
            Ok(FortuneRecord {
                kind: parse_fortune_kind(&row.kind, file)?,
                name: row.name,
                weight: row.weight,
                min_level: row.min_level,
                max_level: row.max_level,
                magnitude: row.magnitude,
                narrative_seed: row.narrative_seed,
            })
        })
        .collect()
}

/// Parse an alignment cell.
fn parse_alignment(s: &str, table: &str) -> Result<Alignment, WorldError> {
    match s.trim().to_lowercase().as_str() {
        "righteous" => Ok(Alignment::Righteous),
        "neutral" => Ok(Alignment::Neutral),
        "demonic" => Ok(Alignment::Demonic),
        other => Err(WorldError::StaticData {
            table: table.to_owned(),
            reason: format!("unknown alignment: {other}"),
        }),
    }
}

/// Parse a fortune-kind cell.
fn parse_fortune_kind(s: &str, table: &str) -> Result<FortuneKind, WorldError> {
    match s.trim().to_lowercase().as_str() {
        "weapon" => Ok(FortuneKind::Weapon),
        "technique" => Ok(FortuneKind::Technique),
        "spirit_stones" => Ok(FortuneKind::SpiritStones),
        "insight" => Ok(FortuneKind::Insight),
        "injury" => Ok(FortuneKind::Injury),
        "theft" => Ok(FortuneKind::Theft),
        "heart_demon" => Ok(FortuneKind::HeartDemon),
        other => Err(WorldError::StaticData {
            table: table.to_owned(),
            reason: format!("unknown fortune kind: {other}"),
        }),
    }
}

/// Parse an `key=value;key=value` effects cell. Empty cells yield an
/// empty map; malformed entries are skipped.
fn parse_effects(s: &str) -> BTreeMap<String, i64> {
    let mut effects = BTreeMap::new();
    for part in s.split(';') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=')
            && let Ok(parsed) = value.trim().parse::<i64>()
        {
            effects.insert(key.trim().to_owned(), parsed);
        }
    }
    effects
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn minimal_bundle_passes_validation() {
        let data = WorldData::minimal();
        assert!(data.validate().is_ok());
        assert!(!data.sects.is_empty());
        assert!(data.weapons.contains_key("Iron Sword"));
    }

    #[test]
    fn effects_cell_parsing() {
        let effects = parse_effects("cultivation_speed=20; hp_regen=-3 ;junk; =5");
        assert_eq!(effects.get("cultivation_speed"), Some(&20));
        assert_eq!(effects.get("hp_regen"), Some(&-3));
        assert_eq!(effects.len(), 3);
        assert!(parse_effects("").is_empty());
    }

    #[test]
    fn random_names_use_the_pools() {
        let data = WorldData::minimal();
        let mut rng = SmallRng::seed_from_u64(11);
        let name = data.names.random_name(xiuxian_types::Gender::Female, &mut rng);
        let (surname, given) = name.split_once(' ').unwrap();
        assert!(data.names.surnames.iter().any(|s| s == surname));
        assert!(data.names.female_given.iter().any(|g| g == given));
    }

    #[test]
    fn load_round_trips_through_csv() {
        let dir = std::env::temp_dir().join(format!(
            "xiuxian_statics_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("sects.csv"),
            "name,alignment,description\nHeavenly Sword Sect,righteous,Blades in the clouds.\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("techniques.csv"),
            "name,grade,min_level,power\nAzure Cloud Scripture,2,0,10\n",
        )
        .unwrap();
        std::fs::write(dir.join("weapons.csv"), "name,grade,power\nIron Sword,1,5\n").unwrap();
        std::fs::write(
            dir.join("auxiliaries.csv"),
            "name,grade,effect\nJade Pendant,2,mind_calm\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("elixirs.csv"),
            "name,grade,duration_months,effects\nQi Gathering Pill,1,6,cultivation_speed=10\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("phenomena.csv"),
            "name,duration_years,description,effects\nSpirit Tide,5,Qi surges.,cultivation_speed=20\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("fortunes.csv"),
            "name,weight,min_level,max_level,kind,magnitude,narrative_seed\nMerchant's Gratitude,5,0,120,spirit_stones,200,a debt repaid\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("misfortunes.csv"),
            "name,weight,min_level,max_level,kind,magnitude,narrative_seed\nBandit Ambush,4,0,59,theft,100,masked figures\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("names.csv"),
            "pool,value\nsurname,Li\nmale,Chen\nfemale,Qing\n",
        )
        .unwrap();

        let data = WorldData::load(&dir).unwrap();
        assert_eq!(data.sects.len(), 1);
        assert_eq!(data.sects.first().unwrap().alignment, Alignment::Righteous);
        assert_eq!(
            data.elixirs
                .get("Qi Gathering Pill")
                .unwrap()
                .effects
                .get("cultivation_speed"),
            Some(&10)
        );
        assert_eq!(data.fortunes.first().unwrap().kind, FortuneKind::SpiritStones);
    }

    #[test]
    fn zero_weight_fails_validation() {
        let mut data = WorldData::minimal();
        if let Some(first) = data.fortunes.first_mut() {
            first.weight = 0;
        }
        assert!(data.validate().is_err());
    }
}
