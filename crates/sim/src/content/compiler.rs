use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use roxmltree::{Document, Node};
use sha2::{Digest, Sha256};

use crate::room::MAX_LEVEL;

use super::database::{
    AbilitySpec, ArchetypeDescriptor, ArchetypeId, ArchetypeTable, AttackSpec, BlinkSpec,
    BurstVariant, ChargeShape, ChargeSpec, HealthTable, PulseSpec, ShadowStepSpec, SpawnPolicy,
};

pub const BUILTIN_ARCHETYPES_XML: &str = include_str!("../../assets/archetypes.xml");
const BUILTIN_SOURCE_NAME: &str = "<builtin>/archetypes.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchetypeErrorCode {
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownDefType,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
    DuplicateDef,
    EmptyTable,
}

#[derive(Debug, Clone)]
pub struct ArchetypeCompileError {
    pub code: ArchetypeErrorCode,
    pub message: String,
    pub source_name: String,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ArchetypeCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (source={}, line={}, column={})",
                self.code, self.message, self.source_name, loc.line, loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (source={})",
                self.code, self.message, self.source_name
            ),
        }
    }
}

impl std::error::Error for ArchetypeCompileError {}

pub fn builtin_archetype_table() -> Result<ArchetypeTable, ArchetypeCompileError> {
    compile_archetype_table(BUILTIN_SOURCE_NAME, BUILTIN_ARCHETYPES_XML)
}

pub fn load_archetype_table(
    override_path: Option<&Path>,
) -> Result<ArchetypeTable, ArchetypeCompileError> {
    let Some(path) = override_path else {
        return builtin_archetype_table();
    };
    let source_name = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|error| ArchetypeCompileError {
        code: ArchetypeErrorCode::ReadFile,
        message: format!("failed to read archetype file: {error}"),
        source_name: source_name.clone(),
        location: None,
    })?;
    compile_archetype_table(&source_name, &raw)
}

pub fn compile_archetype_table(
    source_name: &str,
    raw: &str,
) -> Result<ArchetypeTable, ArchetypeCompileError> {
    let doc = Document::parse(raw).map_err(|error| ArchetypeCompileError {
        code: ArchetypeErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        source_name: source_name.to_string(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;
    let ctx = ParseCtx {
        source_name,
        doc: &doc,
    };

    let root = doc.root_element();
    if root.tag_name().name() != "Archetypes" {
        return Err(ctx.error_at(
            ArchetypeErrorCode::InvalidRoot,
            "root element must be <Archetypes>".to_string(),
            root,
        ));
    }

    let mut seen_names = HashSet::<String>::new();
    let mut descriptors = Vec::<ArchetypeDescriptor>::new();
    for child in root.children().filter(|node| node.is_element()) {
        if child.tag_name().name() != "ArchetypeDef" {
            return Err(ctx.error_at(
                ArchetypeErrorCode::UnknownDefType,
                format!(
                    "unsupported def type <{}>; only <ArchetypeDef> is allowed",
                    child.tag_name().name()
                ),
                child,
            ));
        }
        let descriptor = parse_archetype_def(&ctx, child)?;
        if !seen_names.insert(descriptor.def_name.clone()) {
            return Err(ctx.error_at(
                ArchetypeErrorCode::DuplicateDef,
                format!("duplicate ArchetypeDef '{}'", descriptor.def_name),
                child,
            ));
        }
        descriptors.push(descriptor);
    }

    if descriptors.is_empty() {
        return Err(ctx.error_at(
            ArchetypeErrorCode::EmptyTable,
            "archetype table defines no <ArchetypeDef>".to_string(),
            root,
        ));
    }

    Ok(ArchetypeTable::from_descriptors(
        descriptors,
        hash_source(raw),
    ))
}

fn hash_source(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

struct ParseCtx<'a, 'input> {
    source_name: &'a str,
    doc: &'a Document<'input>,
}

impl ParseCtx<'_, '_> {
    fn error_at(
        &self,
        code: ArchetypeErrorCode,
        message: String,
        node: Node<'_, '_>,
    ) -> ArchetypeCompileError {
        let pos = self.doc.text_pos_at(node.range().start);
        ArchetypeCompileError {
            code,
            message,
            source_name: self.source_name.to_string(),
            location: Some(SourceLocation {
                line: pos.row as usize,
                column: pos.col as usize,
            }),
        }
    }

    fn required_text(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<String, ArchetypeCompileError> {
        let value = node.text().map(str::trim).unwrap_or_default().to_string();
        if value.is_empty() {
            return Err(self.error_at(
                ArchetypeErrorCode::MissingField,
                format!("field <{}> must not be empty", field_name),
                node,
            ));
        }
        Ok(value)
    }

    fn parse_value<T: FromStr>(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
        value: &str,
    ) -> Result<T, ArchetypeCompileError> {
        value.parse::<T>().map_err(|_| {
            self.error_at(
                ArchetypeErrorCode::InvalidValue,
                format!("{} '{}' is not a valid number", field_name, value),
                node,
            )
        })
    }

    fn non_negative(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
        value: f32,
    ) -> Result<f32, ArchetypeCompileError> {
        if !value.is_finite() || value < 0.0 {
            return Err(self.error_at(
                ArchetypeErrorCode::InvalidValue,
                format!("{} must be finite and >= 0", field_name),
                node,
            ));
        }
        Ok(value)
    }

    fn text_f32(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<f32, ArchetypeCompileError> {
        let value = self.required_text(node, field_name)?;
        let parsed = self.parse_value::<f32>(node, field_name, &value)?;
        self.non_negative(node, field_name, parsed)
    }

    fn check_attributes(
        &self,
        node: Node<'_, '_>,
        allowed: &[&str],
    ) -> Result<(), ArchetypeCompileError> {
        for attr in node.attributes() {
            if !allowed.contains(&attr.name()) {
                return Err(self.error_at(
                    ArchetypeErrorCode::UnknownField,
                    format!(
                        "unknown attribute '{}' on <{}>",
                        attr.name(),
                        node.tag_name().name()
                    ),
                    node,
                ));
            }
        }
        Ok(())
    }

    fn attr_str(&self, node: Node<'_, '_>, name: &str) -> Result<String, ArchetypeCompileError> {
        match node.attribute(name).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(self.error_at(
                ArchetypeErrorCode::MissingField,
                format!(
                    "missing required attribute '{}' on <{}>",
                    name,
                    node.tag_name().name()
                ),
                node,
            )),
        }
    }

    fn attr<T: FromStr>(&self, node: Node<'_, '_>, name: &str) -> Result<T, ArchetypeCompileError> {
        let value = self.attr_str(node, name)?;
        self.parse_value(node, name, &value)
    }

    fn attr_opt<T: FromStr>(
        &self,
        node: Node<'_, '_>,
        name: &str,
    ) -> Result<Option<T>, ArchetypeCompileError> {
        match node.attribute(name) {
            Some(_) => self.attr(node, name).map(Some),
            None => Ok(None),
        }
    }

    fn attr_f32(&self, node: Node<'_, '_>, name: &str) -> Result<f32, ArchetypeCompileError> {
        let parsed = self.attr::<f32>(node, name)?;
        self.non_negative(node, name, parsed)
    }

    fn attr_bool(&self, node: Node<'_, '_>, name: &str) -> Result<bool, ArchetypeCompileError> {
        let value = self.attr_str(node, name)?;
        match value.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(self.error_at(
                ArchetypeErrorCode::InvalidValue,
                format!("{} '{}' must be true or false", name, value),
                node,
            )),
        }
    }
}

fn parse_archetype_def(
    ctx: &ParseCtx<'_, '_>,
    node: Node<'_, '_>,
) -> Result<ArchetypeDescriptor, ArchetypeCompileError> {
    let mut seen_fields = HashSet::<String>::new();
    let mut def_name: Option<String> = None;
    let mut label: Option<String> = None;
    let mut move_speed: Option<f32> = None;
    let mut wander_speed: Option<f32> = None;
    let mut wander_radius: Option<f32> = None;
    let mut attack_range: Option<f32> = None;
    let mut base_health: Option<f32> = None;
    let mut health_levels = BTreeMap::<u8, f32>::new();
    let mut attack: Option<AttackSpec> = None;
    let mut abilities = Vec::<AbilitySpec>::new();
    let mut spawn: Option<SpawnPolicy> = None;

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = field.tag_name().name().to_string();
        if !seen_fields.insert(field_name.clone()) {
            return Err(ctx.error_at(
                ArchetypeErrorCode::DuplicateField,
                format!("duplicate field <{}> in <ArchetypeDef>", field_name),
                field,
            ));
        }

        match field_name.as_str() {
            "defName" => def_name = Some(ctx.required_text(field, "defName")?),
            "label" => label = Some(ctx.required_text(field, "label")?),
            "moveSpeed" => move_speed = Some(ctx.text_f32(field, "moveSpeed")?),
            "wanderSpeed" => wander_speed = Some(ctx.text_f32(field, "wanderSpeed")?),
            "wanderRadius" => wander_radius = Some(ctx.text_f32(field, "wanderRadius")?),
            "attackRange" => attack_range = Some(ctx.text_f32(field, "attackRange")?),
            "baseHealth" => {
                let value = ctx.text_f32(field, "baseHealth")?;
                if value <= 0.0 {
                    return Err(ctx.error_at(
                        ArchetypeErrorCode::InvalidValue,
                        "baseHealth must be > 0".to_string(),
                        field,
                    ));
                }
                base_health = Some(value);
            }
            "healthTable" => health_levels = parse_health_table(ctx, field)?,
            "attack" => attack = Some(parse_attack(ctx, field)?),
            "abilities" => abilities = parse_abilities(ctx, field)?,
            "spawn" => spawn = Some(parse_spawn(ctx, field)?),
            _ => {
                return Err(ctx.error_at(
                    ArchetypeErrorCode::UnknownField,
                    format!("unknown field <{}> in <ArchetypeDef>", field_name),
                    field,
                ))
            }
        }
    }

    let missing = |name: &str| {
        ctx.error_at(
            ArchetypeErrorCode::MissingField,
            format!("missing required field <{}> in <ArchetypeDef>", name),
            node,
        )
    };
    let def_name = def_name.ok_or_else(|| missing("defName"))?;
    let label = label.ok_or_else(|| missing("label"))?;
    let move_speed = move_speed.ok_or_else(|| missing("moveSpeed"))?;
    let attack_range = attack_range.ok_or_else(|| missing("attackRange"))?;
    let base_health = base_health.ok_or_else(|| missing("baseHealth"))?;
    let attack = attack.ok_or_else(|| missing("attack"))?;
    let spawn = spawn.ok_or_else(|| missing("spawn"))?;

    Ok(ArchetypeDescriptor {
        id: ArchetypeId(0),
        def_name,
        label,
        move_speed,
        wander_speed: wander_speed.unwrap_or(move_speed * 0.5),
        wander_radius: wander_radius.unwrap_or(5.0),
        attack_range,
        health: HealthTable::new(base_health, health_levels),
        attack,
        abilities,
        spawn,
    })
}

fn parse_health_table(
    ctx: &ParseCtx<'_, '_>,
    node: Node<'_, '_>,
) -> Result<BTreeMap<u8, f32>, ArchetypeCompileError> {
    let mut levels = BTreeMap::<u8, f32>::new();
    for entry in node.children().filter(|child| child.is_element()) {
        if entry.tag_name().name() != "level" {
            return Err(ctx.error_at(
                ArchetypeErrorCode::UnknownField,
                format!(
                    "unknown field <{}> in <healthTable>",
                    entry.tag_name().name()
                ),
                entry,
            ));
        }
        ctx.check_attributes(entry, &["n"])?;
        let level = ctx.attr::<u8>(entry, "n")?;
        if !(1..=MAX_LEVEL).contains(&level) {
            return Err(ctx.error_at(
                ArchetypeErrorCode::InvalidValue,
                format!("level {} is outside 1..={}", level, MAX_LEVEL),
                entry,
            ));
        }
        let health = ctx.text_f32(entry, "level")?;
        if levels.insert(level, health).is_some() {
            return Err(ctx.error_at(
                ArchetypeErrorCode::DuplicateField,
                format!("level {} is listed twice in <healthTable>", level),
                entry,
            ));
        }
    }
    Ok(levels)
}

fn parse_attack(
    ctx: &ParseCtx<'_, '_>,
    node: Node<'_, '_>,
) -> Result<AttackSpec, ArchetypeCompileError> {
    let kind = ctx.attr_str(node, "kind")?;
    match kind.as_str() {
        "simple" => {
            ctx.check_attributes(node, &["kind", "damage", "cooldownMs", "windupMs"])?;
            Ok(AttackSpec::Simple {
                damage: ctx.attr_f32(node, "damage")?,
                cooldown_ms: ctx.attr(node, "cooldownMs")?,
                windup_ms: ctx.attr(node, "windupMs")?,
            })
        }
        "charge" => Ok(AttackSpec::Charge(parse_charge(ctx, node, true)?)),
        _ => Err(ctx.error_at(
            ArchetypeErrorCode::InvalidValue,
            format!(
                "invalid attack kind '{}'; allowed values: simple, charge",
                kind
            ),
            node,
        )),
    }
}

fn parse_charge(
    ctx: &ParseCtx<'_, '_>,
    node: Node<'_, '_>,
    has_kind: bool,
) -> Result<ChargeSpec, ArchetypeCompileError> {
    let mut allowed = vec![
        "name",
        "shape",
        "coneDegrees",
        "damage",
        "range",
        "cooldownMs",
        "chargeMs",
        "impactDelayMs",
        "recoverMs",
    ];
    if has_kind {
        allowed.push("kind");
    }
    ctx.check_attributes(node, &allowed)?;

    let shape_name = ctx.attr_str(node, "shape")?;
    let shape = match shape_name.as_str() {
        "cone" => {
            let degrees = ctx.attr_f32(node, "coneDegrees")?;
            if degrees <= 0.0 || degrees > 360.0 {
                return Err(ctx.error_at(
                    ArchetypeErrorCode::InvalidValue,
                    "coneDegrees must be in (0, 360]".to_string(),
                    node,
                ));
            }
            ChargeShape::Cone { degrees }
        }
        "single" => ChargeShape::Single,
        _ => {
            return Err(ctx.error_at(
                ArchetypeErrorCode::InvalidValue,
                format!(
                    "invalid charge shape '{}'; allowed values: cone, single",
                    shape_name
                ),
                node,
            ))
        }
    };

    Ok(ChargeSpec {
        name: ctx.attr_str(node, "name")?,
        shape,
        damage: ctx.attr_f32(node, "damage")?,
        range: ctx.attr_f32(node, "range")?,
        cooldown_ms: ctx.attr(node, "cooldownMs")?,
        charge_ms: ctx.attr(node, "chargeMs")?,
        impact_delay_ms: ctx.attr(node, "impactDelayMs")?,
        recover_ms: ctx.attr_opt(node, "recoverMs")?.unwrap_or(400),
    })
}

fn parse_abilities(
    ctx: &ParseCtx<'_, '_>,
    node: Node<'_, '_>,
) -> Result<Vec<AbilitySpec>, ArchetypeCompileError> {
    let mut abilities = Vec::<AbilitySpec>::new();
    for entry in node.children().filter(|child| child.is_element()) {
        let ability = match entry.tag_name().name() {
            "charge" => AbilitySpec::Charge(parse_charge(ctx, entry, false)?),
            "burst" => parse_burst(ctx, entry)?,
            "shadowStep" => {
                ctx.check_attributes(
                    entry,
                    &[
                        "name",
                        "cooldownMs",
                        "behindDistance",
                        "emergeDelayMs",
                        "damageMultiplier",
                        "rangeTolerance",
                    ],
                )?;
                AbilitySpec::ShadowStep(ShadowStepSpec {
                    name: ctx.attr_str(entry, "name")?,
                    cooldown_ms: ctx.attr(entry, "cooldownMs")?,
                    behind_distance: ctx.attr_f32(entry, "behindDistance")?,
                    emerge_delay_ms: ctx.attr(entry, "emergeDelayMs")?,
                    damage_multiplier: ctx.attr_f32(entry, "damageMultiplier")?,
                    range_tolerance: ctx.attr_f32(entry, "rangeTolerance")?,
                })
            }
            "pulse" => {
                ctx.check_attributes(
                    entry,
                    &["name", "cooldownMs", "radius", "damage", "knockback"],
                )?;
                AbilitySpec::Pulse(PulseSpec {
                    name: ctx.attr_str(entry, "name")?,
                    cooldown_ms: ctx.attr(entry, "cooldownMs")?,
                    radius: ctx.attr_f32(entry, "radius")?,
                    damage: ctx.attr_f32(entry, "damage")?,
                    knockback: ctx.attr_f32(entry, "knockback")?,
                })
            }
            "blink" => {
                ctx.check_attributes(
                    entry,
                    &[
                        "name",
                        "cooldownMs",
                        "minDistance",
                        "maxDistance",
                        "preferredRange",
                        "maxDisplacement",
                        "windupMs",
                    ],
                )?;
                let spec = BlinkSpec {
                    name: ctx.attr_str(entry, "name")?,
                    cooldown_ms: ctx.attr(entry, "cooldownMs")?,
                    min_distance: ctx.attr_f32(entry, "minDistance")?,
                    max_distance: ctx.attr_f32(entry, "maxDistance")?,
                    preferred_range: ctx.attr_f32(entry, "preferredRange")?,
                    max_displacement: ctx.attr_f32(entry, "maxDisplacement")?,
                    windup_ms: ctx.attr(entry, "windupMs")?,
                };
                if spec.min_distance >= spec.max_distance {
                    return Err(ctx.error_at(
                        ArchetypeErrorCode::InvalidValue,
                        "blink minDistance must be < maxDistance".to_string(),
                        entry,
                    ));
                }
                AbilitySpec::Blink(spec)
            }
            other => {
                return Err(ctx.error_at(
                    ArchetypeErrorCode::UnknownField,
                    format!("unknown ability <{}> in <abilities>", other),
                    entry,
                ))
            }
        };
        abilities.push(ability);
    }
    Ok(abilities)
}

fn parse_burst(
    ctx: &ParseCtx<'_, '_>,
    node: Node<'_, '_>,
) -> Result<AbilitySpec, ArchetypeCompileError> {
    ctx.check_attributes(node, &["name"])?;
    let name = ctx.attr_str(node, "name")?;
    let mut variants = Vec::<BurstVariant>::new();
    for entry in node.children().filter(|child| child.is_element()) {
        if entry.tag_name().name() != "variant" {
            return Err(ctx.error_at(
                ArchetypeErrorCode::UnknownField,
                format!("unknown field <{}> in <burst>", entry.tag_name().name()),
                entry,
            ));
        }
        ctx.check_attributes(
            entry,
            &[
                "name",
                "area",
                "damage",
                "radius",
                "range",
                "cooldownMs",
                "delayMs",
            ],
        )?;
        variants.push(BurstVariant {
            name: ctx.attr_str(entry, "name")?,
            area: ctx.attr_bool(entry, "area")?,
            damage: ctx.attr_f32(entry, "damage")?,
            radius: ctx.attr_f32(entry, "radius")?,
            range: ctx.attr_f32(entry, "range")?,
            cooldown_ms: ctx.attr(entry, "cooldownMs")?,
            delay_ms: ctx.attr(entry, "delayMs")?,
        });
    }
    if variants.is_empty() || variants.len() > 2 {
        return Err(ctx.error_at(
            ArchetypeErrorCode::InvalidValue,
            format!(
                "<burst> '{}' must declare one or two <variant> entries",
                name
            ),
            node,
        ));
    }
    Ok(AbilitySpec::Burst { name, variants })
}

fn parse_spawn(
    ctx: &ParseCtx<'_, '_>,
    node: Node<'_, '_>,
) -> Result<SpawnPolicy, ArchetypeCompileError> {
    ctx.check_attributes(
        node,
        &[
            "periodMs",
            "minLevel",
            "burstMin",
            "burstMax",
            "initial",
            "instanceCap",
        ],
    )?;
    let policy = SpawnPolicy {
        period_ms: ctx.attr(node, "periodMs")?,
        min_level: ctx.attr(node, "minLevel")?,
        instance_cap: ctx.attr_opt(node, "instanceCap")?,
        burst_min: ctx.attr(node, "burstMin")?,
        burst_max: ctx.attr(node, "burstMax")?,
        initial: ctx.attr_opt(node, "initial")?.unwrap_or(0),
    };
    if policy.period_ms == 0 {
        return Err(ctx.error_at(
            ArchetypeErrorCode::InvalidValue,
            "periodMs must be > 0".to_string(),
            node,
        ));
    }
    if !(1..=MAX_LEVEL).contains(&policy.min_level) {
        return Err(ctx.error_at(
            ArchetypeErrorCode::InvalidValue,
            format!("minLevel must be in 1..={}", MAX_LEVEL),
            node,
        ));
    }
    if policy.burst_min == 0 || policy.burst_min > policy.burst_max {
        return Err(ctx.error_at(
            ArchetypeErrorCode::InvalidValue,
            "burstMin must be >= 1 and <= burstMax".to_string(),
            node,
        ));
    }
    Ok(policy)
}
