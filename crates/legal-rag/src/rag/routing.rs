//! Routing Table (C3) — fixed; implementers must not alter (§4.3).
//!
//! A `const`-shaped lookup, not a user-configurable registry: the table
//! encodes a critical invariant (`LEGAL_TEXT` never references DiVA in any
//! tier, §4.3/§8 P2) that must hold regardless of runtime configuration.
//! Collection *names* come from [`crate::config::DefaultCollections`]; the
//! *shape* of which logical collections feed which tier is fixed here.

use crate::config::DefaultCollections;
use crate::rag::intent::QueryIntent;
use crate::types::RoutingConfig;

/// Logical collection references resolved against `DefaultCollections` at
/// lookup time, so the fixed shape below never repeats literal collection
/// name strings.
struct RoutingRule {
    primary: &'static [Collection],
    support: &'static [Collection],
    secondary: &'static [Collection],
    secondary_budget: usize,
    require_separation: bool,
}

#[derive(Clone, Copy)]
enum Collection {
    Sfs,
    Diva,
    Riksdag,
    Gov,
    Guides,
}

impl Collection {
    fn resolve(self, collections: &DefaultCollections) -> String {
        match self {
            Collection::Sfs => collections.sfs.clone(),
            Collection::Diva => collections.diva.clone(),
            Collection::Riksdag => collections.riksdag.clone(),
            Collection::Gov => collections.gov.clone(),
            Collection::Guides => collections.guides.clone(),
        }
    }
}

const LEGAL_TEXT: RoutingRule = RoutingRule {
    primary: &[Collection::Sfs],
    support: &[],
    secondary: &[],
    secondary_budget: 0,
    require_separation: false,
};

const RESEARCH_SYNTHESIS: RoutingRule = RoutingRule {
    primary: &[Collection::Diva],
    support: &[],
    secondary: &[],
    secondary_budget: 0,
    require_separation: false,
};

const PARLIAMENT_TRACE: RoutingRule = RoutingRule {
    primary: &[Collection::Riksdag, Collection::Gov],
    support: &[],
    secondary: &[Collection::Diva],
    secondary_budget: 2,
    require_separation: false,
};

const POLICY_ARGUMENTS: RoutingRule = RoutingRule {
    primary: &[Collection::Riksdag, Collection::Sfs],
    support: &[],
    secondary: &[Collection::Diva],
    secondary_budget: 2,
    require_separation: true,
};

const PRACTICAL_PROCESS: RoutingRule = RoutingRule {
    primary: &[Collection::Guides, Collection::Sfs],
    support: &[],
    secondary: &[],
    secondary_budget: 0,
    require_separation: false,
};

const SMALLTALK: RoutingRule = RoutingRule {
    primary: &[],
    support: &[],
    secondary: &[],
    secondary_budget: 0,
    require_separation: false,
};

const UNKNOWN: RoutingRule = RoutingRule {
    primary: &[Collection::Sfs, Collection::Riksdag, Collection::Gov],
    support: &[],
    secondary: &[Collection::Diva],
    secondary_budget: 2,
    require_separation: false,
};

/// Resolve the fixed rule for `intent` into a concrete [`RoutingConfig`]
/// using the process's configured collection names. `EDGE_ABBREVIATION` and
/// `EDGE_CLARIFICATION` route like `UNKNOWN` (broad retrieval) since the
/// spec's table does not list dedicated rows for them.
pub fn route(intent: QueryIntent, collections: &DefaultCollections) -> RoutingConfig {
    let rule = match intent {
        QueryIntent::LegalText => &LEGAL_TEXT,
        QueryIntent::ResearchSynthesis => &RESEARCH_SYNTHESIS,
        QueryIntent::ParliamentTrace => &PARLIAMENT_TRACE,
        QueryIntent::PolicyArguments => &POLICY_ARGUMENTS,
        QueryIntent::PracticalProcess => &PRACTICAL_PROCESS,
        QueryIntent::Smalltalk => &SMALLTALK,
        QueryIntent::Unknown
        | QueryIntent::EdgeAbbreviation
        | QueryIntent::EdgeClarification => &UNKNOWN,
    };

    RoutingConfig {
        primary: rule.primary.iter().map(|c| c.resolve(collections)).collect(),
        support: rule.support.iter().map(|c| c.resolve(collections)).collect(),
        secondary: rule
            .secondary
            .iter()
            .map(|c| c.resolve(collections))
            .collect(),
        secondary_budget: rule.secondary_budget,
        require_separation: rule.require_separation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_text_never_references_diva() {
        let collections = DefaultCollections::default();
        let cfg = route(QueryIntent::LegalText, &collections);
        assert!(!cfg.primary.contains(&collections.diva));
        assert!(!cfg.support.contains(&collections.diva));
        assert!(!cfg.secondary.contains(&collections.diva));
    }

    #[test]
    fn policy_arguments_requires_separation() {
        let collections = DefaultCollections::default();
        let cfg = route(QueryIntent::PolicyArguments, &collections);
        assert!(cfg.require_separation);
        assert_eq!(cfg.secondary_budget, 2);
    }

    #[test]
    fn smalltalk_routes_nowhere() {
        let collections = DefaultCollections::default();
        let cfg = route(QueryIntent::Smalltalk, &collections);
        assert!(cfg.primary.is_empty());
        assert!(cfg.support.is_empty());
        assert!(cfg.secondary.is_empty());
    }

    #[test]
    fn unknown_casts_a_broad_net_without_diva_in_primary() {
        let collections = DefaultCollections::default();
        let cfg = route(QueryIntent::Unknown, &collections);
        assert!(!cfg.primary.contains(&collections.diva));
        assert!(cfg.secondary.contains(&collections.diva));
    }
}
