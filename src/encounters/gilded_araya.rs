//! Trigger set for the Asura trial.
//!
//! Iconography casts store a mechanic that the image executes later. The
//! first three executions happen with the image fixed north; afterwards the
//! image jumps to a cardinal first and its position arrives as a combatant
//! memory event. `iconicExecutionCount` tracks which case applies.
//!
//! Six-bladed Khadga has two fixed cleave orders. Which one is coming is
//! read from the side of the arena the second limit-cut marker target
//! stands on, fetched live when the marker appears.

use tracing::warn;

use crate::direction::{position_to_direction, resolve_safe_zone, BinCount, DirectionBin, HazardShape, Position};
use crate::error::{CalloutError, ValidationError};
use crate::event::EventType;
use crate::output::{AlertLevel, TriggerOutput};
use crate::state::SessionState;
use crate::trigger::{ActorSelector, FetchGuard, FetchSpec, FieldPattern, TriggerDefinition, TriggerSet};

/// Trigger set id.
pub const SET_ID: &str = "TheGildedAraya";
/// Territory the set loads for.
pub const ZONE_ID: u32 = 1178;
/// Boss actor name.
pub const BOSS: &str = "Asura";
/// Image actor name.
pub const IMAGE: &str = "Asura Image";
/// Arena center.
pub const CENTER: Position = Position::new(100.0, 100.0);
/// Executions before the image starts jumping.
pub const JUMP_THRESHOLD: u64 = 3;

/// Session keys.
pub mod keys {
    /// Counter of completed iconic executions.
    pub const ICONIC_EXECUTION_COUNT: &str = "iconicExecutionCount";
    /// Actor id of the Asura image.
    pub const IMAGE_ID: &str = "asuraImageId";
    /// Iconography mechanic waiting to be executed.
    pub const STORED_ICON_MECH: &str = "storedIconMech";
    /// Fetched combatant carrying the second limit-cut marker.
    pub const KHADGA_LC2_COMBATANT: &str = "khadgaLc2Combatant";
    /// Side (east / west) of the second limit-cut marker.
    pub const KHADGA_LC2_LOC: &str = "khadgaLc2Loc";
}

/// Iconography mechanic copied onto the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iconography {
    /// Pedestal Purge: get away from the image.
    Out,
    /// Wheel of Deincarnation: get under the image.
    In,
    /// Bladewise: get to the image's sides.
    Sides,
}

impl Iconography {
    /// Ability ids of the boss casts, in mechanic order.
    pub const CAST_IDS: [&'static str; 3] = ["8C81", "8C83", "8C85"];

    /// Mechanic for a boss cast id.
    #[must_use]
    pub fn from_cast_id(id: &str) -> Option<Self> {
        match id {
            "8C81" => Some(Self::Out),
            "8C83" => Some(Self::In),
            "8C85" => Some(Self::Sides),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Out => "out",
            Self::In => "in",
            Self::Sides => "sides",
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "out" => Some(Self::Out),
            "in" => Some(Self::In),
            "sides" => Some(Self::Sides),
            _ => None,
        }
    }

    /// Hazard geometry of the mechanic relative to the image.
    #[must_use]
    pub const fn shape(self) -> HazardShape {
        match self {
            Self::Out => HazardShape::Point,
            Self::In => HazardShape::Donut,
            Self::Sides => HazardShape::Cleave,
        }
    }
}

fn stored_mech(state: &SessionState) -> Result<Option<Iconography>, CalloutError> {
    Ok(state.text(keys::STORED_ICON_MECH)?.and_then(Iconography::parse))
}

fn jumps_started(state: &SessionState) -> bool {
    state.counter(keys::ICONIC_EXECUTION_COUNT) >= JUMP_THRESHOLD
}

fn execution_output(mech: Iconography, image: DirectionBin) -> TriggerOutput {
    TriggerOutput::new("text")
        .with("mech", mech.as_str())
        .with_safe_zone(resolve_safe_zone(image, mech.shape()))
}

fn clear_mech(state: &mut SessionState) {
    state.delete(keys::STORED_ICON_MECH);
}

fn iconography_cast(name: &str, mech: Iconography, cast_id: &str) -> Result<TriggerDefinition, ValidationError> {
    TriggerDefinition::builder(name, EventType::StartsUsing)
        .id(cast_id)
        .source(BOSS)
        .level(AlertLevel::Alert)
        .output(move |state, _| {
            if jumps_started(state) {
                return Ok(Some(TriggerOutput::new("withJump").with("mech", mech.as_str())));
            }
            // Before any jump the image is always north.
            Ok(Some(
                TriggerOutput::new("noJump")
                    .with("mech", mech.as_str())
                    .with_safe_zone(resolve_safe_zone(DirectionBin::North, mech.shape())),
            ))
        })
        .run(move |state, _| {
            state.write(keys::STORED_ICON_MECH, mech.as_str());
            Ok(())
        })
        .build()
}

fn khadga_sequence(side: DirectionBin) -> Option<[DirectionBin; 4]> {
    use DirectionBin::{East, SouthEast, SouthWest, West};
    match side {
        West => Some([SouthEast, SouthWest, East, West]),
        East => Some([SouthWest, SouthEast, West, East]),
        _ => None,
    }
}

/// Builds the trigger set.
///
/// # Errors
///
/// Returns a `ValidationError` if a definition fails to build.
pub fn trigger_set() -> Result<TriggerSet, ValidationError> {
    TriggerSet::builder(SET_ID)
        .zone_id(ZONE_ID)
        .center(CENTER)
        .init_state(|state| state.init_counter(keys::ICONIC_EXECUTION_COUNT))
        .trigger(
            TriggerDefinition::builder("Asura Lower Realm", EventType::StartsUsing)
                .id("8CA1")
                .source(BOSS)
                .response("aoe")
                .build()?,
        )
        .trigger(
            TriggerDefinition::builder("Asura Cutting Jewel", EventType::StartsUsing)
                .id("8CA0")
                .source(BOSS)
                .response("tankCleave")
                .build()?,
        )
        .trigger(
            TriggerDefinition::builder("Asura Ephemerality", EventType::Ability)
                .id("8C96")
                .source(BOSS)
                .suppress_secs(2.0)
                .level(AlertLevel::Alert)
                .response("avoidClones")
                .build()?,
        )
        .trigger(iconography_cast("Asura Pedestal Purge", Iconography::Out, "8C81")?)
        .trigger(iconography_cast("Asura Wheel of Deincarnation", Iconography::In, "8C83")?)
        .trigger(iconography_cast("Asura Bladewise", Iconography::Sides, "8C85")?)
        .trigger(
            TriggerDefinition::builder("Asura Iconic Execution Tracker", EventType::Ability)
                .id("8CB1")
                .source(BOSS)
                .run(|state, _| {
                    state.increment(keys::ICONIC_EXECUTION_COUNT);
                    Ok(())
                })
                .build()?,
        )
        .trigger(
            // Divine Awakening
            TriggerDefinition::builder("Asura Image Combatant ID Collect", EventType::Ability)
                .id("8C80")
                .source(IMAGE)
                .run(|state, ctx| {
                    let id = ctx
                        .event
                        .get_actor("sourceId")
                        .ok_or_else(|| CalloutError::missing("sourceId"))?;
                    state.write(keys::IMAGE_ID, id);
                    Ok(())
                })
                .build()?,
        )
        .trigger(
            TriggerDefinition::builder("Asura Iconic Execution No Jump", EventType::Ability)
                .id_matches(FieldPattern::any_of(Iconography::CAST_IDS))
                .source(BOSS)
                .condition(|state, _| !jumps_started(state))
                .delay_secs(2.0)
                .level(AlertLevel::Alert)
                .output(|state, _| Ok(stored_mech(state)?.map(|mech| execution_output(mech, DirectionBin::North))))
                .run(|state, _| {
                    clear_mech(state);
                    Ok(())
                })
                .build()?,
        )
        .trigger(
            TriggerDefinition::builder("Asura Iconic Execution With Jump", EventType::CombatantMemory)
                // Enemy actors only.
                .id_matches(FieldPattern::regex("4[0-9A-Fa-f]{7}"))
                .condition(|state, event| {
                    let image = state.actor(keys::IMAGE_ID).ok().flatten();
                    jumps_started(state)
                        && image.is_some()
                        && image == event.get_actor("id")
                        && state.contains(keys::STORED_ICON_MECH)
                })
                .level(AlertLevel::Alert)
                .output(|state, ctx| {
                    let Some(pos) = ctx.event.position("pairPosX", "pairPosY") else {
                        return Ok(None);
                    };
                    let image = position_to_direction(Some(pos), ctx.center, BinCount::Four);
                    Ok(stored_mech(state)?.map(|mech| execution_output(mech, image)))
                })
                .run(|state, _| {
                    clear_mech(state);
                    Ok(())
                })
                .build()?,
        )
        .trigger(
            // 8C90 red E / blue W, 8C92 red N / blue S
            TriggerDefinition::builder("Asura Face of Wrath", EventType::StartsUsing)
                .id_matches(FieldPattern::any_of(["8C90", "8C92"]))
                .source(BOSS)
                .level(AlertLevel::Alert)
                .response("wrath")
                .build()?,
        )
        .trigger(
            // 8C93 red N / blue S, 8C95 blue N / red S
            TriggerDefinition::builder("Asura Face of Delight", EventType::StartsUsing)
                .id_matches(FieldPattern::any_of(["8C93", "8C95"]))
                .source(BOSS)
                .level(AlertLevel::Alert)
                .response("delight")
                .build()?,
        )
        .trigger(
            // The marked player is repositioned ~3s before the marker, so no delay.
            TriggerDefinition::builder("Asura Six-bladed Khadga LC2 Collect", EventType::HeadMarker)
                .id_matches(FieldPattern::Numeric(0x01C7))
                .fetch(
                    FetchSpec::new(ActorSelector::EventTarget)
                        .guarded(FetchGuard::Unchanged(keys::KHADGA_LC2_LOC.to_string())),
                )
                .run(|state, ctx| {
                    let Some(combatant) = ctx.fetched.first() else {
                        return Err(CalloutError::missing(keys::KHADGA_LC2_COMBATANT));
                    };
                    state.write(keys::KHADGA_LC2_COMBATANT, combatant.clone());
                    match position_to_direction(Some(combatant.position), ctx.center, BinCount::Eight) {
                        side @ (DirectionBin::East | DirectionBin::West) => {
                            state.write(keys::KHADGA_LC2_LOC, side);
                        }
                        other => {
                            warn!(actor = %combatant.id, direction = %other, "could not determine Khadga sequence");
                        }
                    }
                    Ok(())
                })
                .build()?,
        )
        .trigger(
            TriggerDefinition::builder("Asura Six-bladed Khadga", EventType::StartsUsing)
                .id("8C88")
                .source(BOSS)
                // LC2 marker data lands ~3.5s after the cast starts.
                .delay_secs(4.5)
                .duration_secs(19.5)
                .level(AlertLevel::Alert)
                .output(|state, _| {
                    let Some(sequence) = state.direction(keys::KHADGA_LC2_LOC)?.and_then(khadga_sequence) else {
                        return Ok(None);
                    };
                    let [dir1, dir2, dir3, dir4] = sequence;
                    Ok(Some(
                        TriggerOutput::new("text")
                            .with("dir1", dir1)
                            .with("dir2", dir2)
                            .with("dir3", dir3)
                            .with("dir4", dir4),
                    ))
                })
                .run(|state, _| {
                    state.delete(keys::KHADGA_LC2_COMBATANT);
                    state.delete(keys::KHADGA_LC2_LOC);
                    Ok(())
                })
                .build()?,
        )
        .build()
}
