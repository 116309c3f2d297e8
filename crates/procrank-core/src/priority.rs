//! Signal tuple delivered by the embedder and its reduction to an
//! effective importance / binding tier.

use serde::{Deserialize, Serialize};

use crate::types::{BindingTier, Importance, RankSignals};

/// Everything the embedder reports about a renderer on a priority update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritySignals {
    pub visible: bool,
    pub has_media_stream: bool,
    pub has_immersive_xr_session: bool,
    pub has_foreground_service_worker: bool,
    pub frame_depth: u32,
    pub intersects_viewport: bool,
    pub boost_for_pending_views: bool,
    pub boost_for_loading: bool,
    pub is_spare_renderer: bool,
    pub importance: Importance,
}

impl PrioritySignals {
    /// The subset the ranking orders by.
    pub fn rank_signals(&self) -> RankSignals {
        RankSignals {
            visible: self.visible,
            frame_depth: self.frame_depth,
            intersects_viewport: self.intersects_viewport,
            is_spare_renderer: self.is_spare_renderer,
            importance: self.importance,
        }
    }
}

/// Embedder capabilities that change how signals are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityRules {
    pub support_not_perceptible_binding: bool,
    /// Treat a renderer with a media stream as moderate instead of important.
    pub media_stream_moderate: bool,
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self {
            support_not_perceptible_binding: true,
            media_stream_moderate: false,
        }
    }
}

/// Reduce a signal tuple to the importance its binding should reflect.
pub fn effective_importance(signals: &PrioritySignals, rules: PriorityRules) -> Importance {
    let s = signals;
    if (s.visible && s.frame_depth == 0)
        || s.importance == Importance::Important
        || (s.has_media_stream && !rules.media_stream_moderate)
        || s.has_immersive_xr_session
    {
        Importance::Important
    } else if (s.visible && s.frame_depth > 0 && s.intersects_viewport)
        || s.boost_for_pending_views
        || s.importance == Importance::Moderate
        || (s.has_media_stream && rules.media_stream_moderate)
        || s.has_foreground_service_worker
        || s.boost_for_loading
    {
        Importance::Moderate
    } else if rules.support_not_perceptible_binding && s.importance == Importance::Perceptible {
        Importance::Perceptible
    } else {
        Importance::Normal
    }
}

/// Binding tier held on behalf of an effective importance.
pub fn binding_tier_for(importance: Importance) -> Option<BindingTier> {
    match importance {
        Importance::Normal => None,
        Importance::Perceptible => Some(BindingTier::NotPerceptible),
        Importance::Moderate => Some(BindingTier::Visible),
        Importance::Important => Some(BindingTier::Strong),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> PriorityRules {
        PriorityRules::default()
    }

    #[test]
    fn default_signals_are_normal() {
        assert_eq!(
            effective_importance(&PrioritySignals::default(), rules()),
            Importance::Normal
        );
    }

    #[test]
    fn visible_main_frame_is_important() {
        let s = PrioritySignals {
            visible: true,
            ..Default::default()
        };
        assert_eq!(effective_importance(&s, rules()), Importance::Important);
    }

    #[test]
    fn visible_intersecting_subframe_is_moderate() {
        let s = PrioritySignals {
            visible: true,
            frame_depth: 2,
            intersects_viewport: true,
            ..Default::default()
        };
        assert_eq!(effective_importance(&s, rules()), Importance::Moderate);

        let offscreen = PrioritySignals {
            intersects_viewport: false,
            ..s
        };
        assert_eq!(effective_importance(&offscreen, rules()), Importance::Normal);
    }

    #[test]
    fn boosts_and_service_worker_are_moderate() {
        for s in [
            PrioritySignals {
                boost_for_loading: true,
                ..Default::default()
            },
            PrioritySignals {
                boost_for_pending_views: true,
                ..Default::default()
            },
            PrioritySignals {
                has_foreground_service_worker: true,
                ..Default::default()
            },
        ] {
            assert_eq!(effective_importance(&s, rules()), Importance::Moderate);
        }
    }

    #[test]
    fn media_stream_follows_rule() {
        let s = PrioritySignals {
            has_media_stream: true,
            ..Default::default()
        };
        assert_eq!(effective_importance(&s, rules()), Importance::Important);
        let moderate_rules = PriorityRules {
            media_stream_moderate: true,
            ..rules()
        };
        assert_eq!(effective_importance(&s, moderate_rules), Importance::Moderate);
    }

    #[test]
    fn xr_session_is_important() {
        let s = PrioritySignals {
            has_immersive_xr_session: true,
            ..Default::default()
        };
        assert_eq!(effective_importance(&s, rules()), Importance::Important);
    }

    #[test]
    fn perceptible_requires_support() {
        let s = PrioritySignals {
            importance: Importance::Perceptible,
            ..Default::default()
        };
        assert_eq!(effective_importance(&s, rules()), Importance::Perceptible);
        let unsupported = PriorityRules {
            support_not_perceptible_binding: false,
            ..rules()
        };
        assert_eq!(effective_importance(&s, unsupported), Importance::Normal);
    }

    #[test]
    fn tier_mapping() {
        assert_eq!(binding_tier_for(Importance::Normal), None);
        assert_eq!(
            binding_tier_for(Importance::Important),
            Some(BindingTier::Strong)
        );
        assert_eq!(
            binding_tier_for(Importance::Moderate),
            Some(BindingTier::Visible)
        );
        assert_eq!(
            binding_tier_for(Importance::Perceptible),
            Some(BindingTier::NotPerceptible)
        );
    }

    #[test]
    fn rank_signals_projection() {
        let s = PrioritySignals {
            visible: true,
            frame_depth: 3,
            intersects_viewport: true,
            is_spare_renderer: true,
            importance: Importance::Moderate,
            has_media_stream: true,
            ..Default::default()
        };
        let r = s.rank_signals();
        assert!(r.visible && r.intersects_viewport && r.is_spare_renderer);
        assert_eq!(r.frame_depth, 3);
        assert_eq!(r.importance, Importance::Moderate);
    }
}
