use serde::{Deserialize, Serialize};
use stallmap_shared::Stall;
use stallmap_shared::colors::{
    EMPHASIS, NEUTRAL, PLACEHOLDER, hover_color, prefix_color, stall_prefix,
};

use crate::log;
use crate::matcher::{StallIndex, match_spaces};
use crate::sdk::{MapHandle, MapSpace, VisualState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Simple,
    Category,
}

impl ColorMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Simple => "Simple",
            Self::Category => "By section",
        }
    }
}

/// Fill policy for one space. Only open stalls are ever interactive, and only
/// when the host can handle a click.
pub fn visual_state(stall: Option<&Stall>, mode: ColorMode, clickable: bool) -> VisualState {
    let (color, interactive) = match stall {
        Some(stall) if stall.status.is_open() => (EMPHASIS, clickable),
        Some(stall) => {
            let color = match mode {
                ColorMode::Simple => NEUTRAL,
                ColorMode::Category => {
                    prefix_color(&stall_prefix(&stall.stall_number)).unwrap_or(NEUTRAL)
                }
            };
            (color, false)
        }
        None => (PLACEHOLDER, false),
    };

    VisualState {
        color,
        hover_color: hover_color(color),
        interactive,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPlan {
    pub states: Vec<(MapSpace, VisualState)>,
    pub matched: usize,
    pub unmatched: usize,
}

pub fn plan_overlay(
    spaces: &[MapSpace],
    index: &StallIndex,
    mode: ColorMode,
    clickable: bool,
) -> OverlayPlan {
    let report = match_spaces(index, spaces);
    let states = report
        .assignments
        .iter()
        .map(|assignment| {
            (
                assignment.space.clone(),
                visual_state(assignment.stall, mode, clickable),
            )
        })
        .collect();

    OverlayPlan {
        states,
        matched: report.matched,
        unmatched: report.unmatched,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyReport {
    pub painted: usize,
    pub failures: usize,
}

/// Push every planned state to the map. A space the renderer rejects is logged
/// and skipped.
pub fn apply_overlay(handle: &dyn MapHandle, plan: &OverlayPlan) -> ApplyReport {
    let mut report = ApplyReport::default();
    for (space, state) in &plan.states {
        match handle.apply_visual_state(&space.space_id, *state) {
            Ok(()) => report.painted += 1,
            Err(e) => {
                report.failures += 1;
                log::warn(&format!("could not paint space {}: {e}", space.label()));
            }
        }
    }
    report
}
