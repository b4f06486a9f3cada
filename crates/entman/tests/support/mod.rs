//! Shared fixtures for the integration suite.
//!
//! The model covers every association shape the runtime supports:
//!
//! - `Team.heroes`: to-many, FK on `hero.team_id`, lazy, cascade persist
//! - `Team.trophies`: to-many, FK on `trophy.team_id` (generated,
//!   `Trophy` does not declare it), eager, cascade persist
//! - `Hero.team`: to-one, FK on `hero.team_id`, lazy
//! - `Hero.powers`: to-many via the `hero_power` link table, lazy,
//!   cascade persist; `Power` uses sequence keys
//! - `Armory.gadgets`: to-many, FK on `gadget.armory_id` (generated),
//!   lazy, cascade all (the one opt-in to cascade remove)

#![allow(dead_code)]

use entman::{
    AssociationContext, AssociationInfo, CascadePolicy, CascadeTarget, ColumnDef, Entity,
    FetchPolicy, JoinTableInfo, KeyStrategy, LazyMany, LazyRef, Result, Row, SchemaCatalog,
    Session, SqlType, Value,
};
use entman_memory::SharedMemory;
use std::sync::Arc;

// ============================================================================
// Team
// ============================================================================

#[derive(Debug, Clone)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
    pub heroes: LazyMany<Hero>,
    pub trophies: LazyMany<Trophy>,
}

impl Team {
    pub const HEROES: AssociationInfo =
        AssociationInfo::to_many("heroes", "hero", "id", "team_id")
            .cascade(CascadePolicy::Persist)
            .target_columns(Hero::columns);

    pub const TROPHIES: AssociationInfo =
        AssociationInfo::to_many("trophies", "trophy", "id", "team_id")
            .fetch(FetchPolicy::Eager)
            .cascade(CascadePolicy::Persist)
            .target_columns(Trophy::columns);

    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            heroes: LazyMany::new(),
            trophies: LazyMany::new(),
        }
    }

    pub fn heroes_assoc() -> &'static AssociationInfo {
        &<Self as Entity>::ASSOCIATIONS[0]
    }

    pub fn trophies_assoc() -> &'static AssociationInfo {
        &<Self as Entity>::ASSOCIATIONS[1]
    }
}

impl Entity for Team {
    const TABLE_NAME: &'static str = "team";
    const KEY_COLUMN: &'static str = "id";
    const ASSOCIATIONS: &'static [AssociationInfo] = &[Team::HEROES, Team::TROPHIES];

    fn columns() -> &'static [ColumnDef] {
        static COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("id", SqlType::BigInt).primary_key(),
            ColumnDef::new("name", SqlType::Text).not_null(),
        ];
        COLUMNS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("name", Value::Text(self.name.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            heroes: LazyMany::unwired("heroes"),
            trophies: LazyMany::unwired("trophies"),
        })
    }

    fn apply_row(&mut self, row: &Row) -> Result<()> {
        self.name = row.get_named("name")?;
        Ok(())
    }

    fn key(&self) -> Option<Value> {
        self.id.map(Value::BigInt)
    }

    fn set_key(&mut self, key: Value) {
        self.id = key.as_i64();
    }

    fn wire_associations(&mut self, ctx: &mut AssociationContext<'_>) -> Result<()> {
        let Some(key) = self.key() else {
            return Ok(());
        };
        self.heroes = ctx.defer_many(Self::heroes_assoc(), &key);
        self.trophies = ctx.fetch_many(Self::trophies_assoc(), &key)?;
        Ok(())
    }

    fn cascade_targets(&self) -> Vec<CascadeTarget> {
        let mut targets = self.heroes.cascade_targets(Self::heroes_assoc());
        targets.extend(self.trophies.cascade_targets(Self::trophies_assoc()));
        targets
    }
}

// ============================================================================
// Hero
// ============================================================================

#[derive(Debug, Clone)]
pub struct Hero {
    pub id: Option<i64>,
    pub name: String,
    pub team: LazyRef<Team>,
    pub powers: LazyMany<Power>,
}

impl Hero {
    pub const TEAM: AssociationInfo = AssociationInfo::to_one("team", "team", "id", "team_id")
        .target_columns(Team::columns);

    pub const POWERS: AssociationInfo = AssociationInfo::many_via(
        "powers",
        "power",
        "id",
        JoinTableInfo::new("hero_power", "hero_id", "power_id"),
    )
    .cascade(CascadePolicy::Persist)
    .target_columns(Power::columns);

    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            team: LazyRef::empty(),
            powers: LazyMany::new(),
        }
    }

    pub fn team_assoc() -> &'static AssociationInfo {
        &<Self as Entity>::ASSOCIATIONS[0]
    }

    pub fn powers_assoc() -> &'static AssociationInfo {
        &<Self as Entity>::ASSOCIATIONS[1]
    }
}

impl Entity for Hero {
    const TABLE_NAME: &'static str = "hero";
    const KEY_COLUMN: &'static str = "id";
    const ASSOCIATIONS: &'static [AssociationInfo] = &[Hero::TEAM, Hero::POWERS];

    fn columns() -> &'static [ColumnDef] {
        static COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("id", SqlType::BigInt).primary_key(),
            ColumnDef::new("name", SqlType::Text).not_null(),
            ColumnDef::new("team_id", SqlType::BigInt),
        ];
        COLUMNS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("name", Value::Text(self.name.clone())),
            ("team_id", self.team.fk_value()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let team_fk: Option<i64> = row.get_named("team_id")?;
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            team: LazyRef::from_fk("team", team_fk.map(Value::BigInt)),
            powers: LazyMany::unwired("powers"),
        })
    }

    fn apply_row(&mut self, row: &Row) -> Result<()> {
        self.name = row.get_named("name")?;
        Ok(())
    }

    fn key(&self) -> Option<Value> {
        self.id.map(Value::BigInt)
    }

    fn set_key(&mut self, key: Value) {
        self.id = key.as_i64();
    }

    fn wire_associations(&mut self, ctx: &mut AssociationContext<'_>) -> Result<()> {
        let Some(key) = self.key() else {
            return Ok(());
        };
        let team_fk = match self.team.fk_value() {
            Value::Null => None,
            fk => Some(fk),
        };
        self.team = ctx.defer_ref(Self::team_assoc(), team_fk);
        self.powers = ctx.defer_many(Self::powers_assoc(), &key);
        Ok(())
    }

    fn cascade_targets(&self) -> Vec<CascadeTarget> {
        self.powers.cascade_targets(Self::powers_assoc())
    }
}

// ============================================================================
// Trophy (no declared FK column; "team_id" is generated from Team.TROPHIES)
// ============================================================================

#[derive(Debug, Clone)]
pub struct Trophy {
    pub id: Option<i64>,
    pub title: String,
}

impl Trophy {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
        }
    }
}

impl Entity for Trophy {
    const TABLE_NAME: &'static str = "trophy";
    const KEY_COLUMN: &'static str = "id";

    fn columns() -> &'static [ColumnDef] {
        static COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("id", SqlType::BigInt).primary_key(),
            ColumnDef::new("title", SqlType::Text).not_null(),
        ];
        COLUMNS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("title", Value::Text(self.title.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            title: row.get_named("title")?,
        })
    }

    fn key(&self) -> Option<Value> {
        self.id.map(Value::BigInt)
    }

    fn set_key(&mut self, key: Value) {
        self.id = key.as_i64();
    }
}

// ============================================================================
// Power (sequence keys)
// ============================================================================

#[derive(Debug, Clone)]
pub struct Power {
    pub id: Option<i64>,
    pub name: String,
}

impl Power {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }
}

impl Entity for Power {
    const TABLE_NAME: &'static str = "power";
    const KEY_COLUMN: &'static str = "id";
    const KEY_STRATEGY: KeyStrategy = KeyStrategy::Sequence;

    fn columns() -> &'static [ColumnDef] {
        static COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("id", SqlType::BigInt).primary_key(),
            ColumnDef::new("name", SqlType::Text).not_null(),
        ];
        COLUMNS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("name", Value::Text(self.name.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
        })
    }

    fn key(&self) -> Option<Value> {
        self.id.map(Value::BigInt)
    }

    fn set_key(&mut self, key: Value) {
        self.id = key.as_i64();
    }
}

// ============================================================================
// Armory / Gadget (cascade all: the opt-in to cascade remove)
// ============================================================================

#[derive(Debug, Clone)]
pub struct Armory {
    pub id: Option<i64>,
    pub location: String,
    pub gadgets: LazyMany<Gadget>,
}

impl Armory {
    pub const GADGETS: AssociationInfo =
        AssociationInfo::to_many("gadgets", "gadget", "id", "armory_id")
            .cascade(CascadePolicy::All)
            .target_columns(Gadget::columns);

    pub fn new(location: &str) -> Self {
        Self {
            id: None,
            location: location.to_string(),
            gadgets: LazyMany::new(),
        }
    }

    pub fn gadgets_assoc() -> &'static AssociationInfo {
        &<Self as Entity>::ASSOCIATIONS[0]
    }
}

impl Entity for Armory {
    const TABLE_NAME: &'static str = "armory";
    const KEY_COLUMN: &'static str = "id";
    const ASSOCIATIONS: &'static [AssociationInfo] = &[Armory::GADGETS];

    fn columns() -> &'static [ColumnDef] {
        static COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("id", SqlType::BigInt).primary_key(),
            ColumnDef::new("location", SqlType::Text).not_null(),
        ];
        COLUMNS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("location", Value::Text(self.location.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            location: row.get_named("location")?,
            gadgets: LazyMany::unwired("gadgets"),
        })
    }

    fn apply_row(&mut self, row: &Row) -> Result<()> {
        self.location = row.get_named("location")?;
        Ok(())
    }

    fn key(&self) -> Option<Value> {
        self.id.map(Value::BigInt)
    }

    fn set_key(&mut self, key: Value) {
        self.id = key.as_i64();
    }

    fn wire_associations(&mut self, ctx: &mut AssociationContext<'_>) -> Result<()> {
        let Some(key) = self.key() else {
            return Ok(());
        };
        self.gadgets = ctx.defer_many(Self::gadgets_assoc(), &key);
        Ok(())
    }

    fn cascade_targets(&self) -> Vec<CascadeTarget> {
        self.gadgets.cascade_targets(Self::gadgets_assoc())
    }
}

#[derive(Debug, Clone)]
pub struct Gadget {
    pub id: Option<i64>,
    pub label: String,
}

impl Gadget {
    pub fn new(label: &str) -> Self {
        Self {
            id: None,
            label: label.to_string(),
        }
    }
}

impl Entity for Gadget {
    const TABLE_NAME: &'static str = "gadget";
    const KEY_COLUMN: &'static str = "id";

    fn columns() -> &'static [ColumnDef] {
        static COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("id", SqlType::BigInt).primary_key(),
            ColumnDef::new("label", SqlType::Text).not_null(),
        ];
        COLUMNS
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("label", Value::Text(self.label.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            label: row.get_named("label")?,
        })
    }

    fn key(&self) -> Option<Value> {
        self.id.map(Value::BigInt)
    }

    fn set_key(&mut self, key: Value) {
        self.id = key.as_i64();
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// Shared engine + catalog; sessions are opened per unit of work, the
/// way an application holds one factory and many short-lived sessions.
pub struct Fixture {
    pub storage: SharedMemory,
    pub catalog: Arc<SchemaCatalog>,
}

impl Fixture {
    pub fn new() -> Self {
        let mut catalog = SchemaCatalog::new();
        catalog.register::<Team>();
        catalog.register::<Hero>();
        catalog.register::<Trophy>();
        catalog.register::<Power>();
        catalog.register::<Armory>();
        catalog.register::<Gadget>();

        let ddl = catalog.create_all_sql();
        let storage = SharedMemory::with_schema(&ddl).expect("schema creation failed");
        Self {
            storage,
            catalog: Arc::new(catalog),
        }
    }

    pub fn session(&self) -> Session {
        Session::new(Box::new(self.storage.clone()), Arc::clone(&self.catalog))
    }
}
