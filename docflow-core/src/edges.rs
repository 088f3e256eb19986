//! Edge resolution.

use crate::{
    context::Context,
    definition::{Edge, Target},
    error::{FlowError, Result},
    history::StepOutcome,
};

/// Pick the edge to follow after `step` ended with `outcome`.
///
/// Guarded edges whose guard holds take precedence; more than one is an
/// ambiguity. With no matching guard the single unguarded edge is used. No
/// edge at all is a configuration error.
pub fn resolve_next(
    edges: &[Edge],
    step: &str,
    outcome: StepOutcome,
    ctx: &Context,
) -> Result<Target> {
    let candidates = edges.iter().filter(|e| e.trigger == outcome);

    let mut matched = candidates
        .clone()
        .filter(|e| e.guard.as_ref().is_some_and(|g| g.check(ctx)));
    if let Some(first) = matched.next() {
        if let Some(second) = matched.next() {
            let labels = [first, second]
                .iter()
                .filter_map(|e| e.guard.as_ref().map(|g| g.label().to_string()))
                .collect::<Vec<_>>()
                .join("', '");
            return Err(FlowError::configuration(format!(
                "ambiguous '{outcome}' edges from step '{step}': guards '{labels}' all hold"
            )));
        }
        return Ok(first.target.clone());
    }

    let mut fallback = candidates.filter(|e| e.guard.is_none());
    match (fallback.next(), fallback.next()) {
        (Some(edge), None) => Ok(edge.target.clone()),
        (Some(_), Some(_)) => Err(FlowError::configuration(format!(
            "step '{step}' has more than one unguarded '{outcome}' edge"
        ))),
        (None, _) => Err(FlowError::configuration(format!(
            "no edge from step '{step}' matches outcome '{outcome}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Guard;

    fn edge(trigger: StepOutcome, guard: Option<Guard>, target: Target) -> Edge {
        Edge {
            trigger,
            guard,
            target,
        }
    }

    fn ctx_with_type(doc_type: &str) -> Context {
        let mut ctx = Context::new();
        ctx.set("document_type", doc_type).unwrap();
        ctx
    }

    #[test]
    fn test_matching_guard_beats_fallback() {
        let edges = vec![
            edge(StepOutcome::Succeeded, None, Target::End),
            edge(
                StepOutcome::Succeeded,
                Some(Guard::not_equals("document_type", "unknown")),
                Target::step("extract"),
            ),
        ];

        let next = resolve_next(&edges, "classify", StepOutcome::Succeeded, &ctx_with_type("invoice"));
        assert_eq!(next.unwrap(), Target::step("extract"));

        let next = resolve_next(&edges, "classify", StepOutcome::Succeeded, &ctx_with_type("unknown"));
        assert_eq!(next.unwrap(), Target::End);
    }

    #[test]
    fn test_outcome_filters_edges() {
        let edges = vec![
            edge(StepOutcome::Succeeded, None, Target::step("next")),
            edge(StepOutcome::Failed, None, Target::End),
        ];

        let next = resolve_next(&edges, "a", StepOutcome::Failed, &Context::new());
        assert_eq!(next.unwrap(), Target::End);
    }

    #[test]
    fn test_ambiguous_guards_are_rejected() {
        let edges = vec![
            edge(StepOutcome::Succeeded, Some(Guard::has_key("document_type")), Target::step("a")),
            edge(StepOutcome::Succeeded, Some(Guard::equals("document_type", "form")), Target::step("b")),
        ];

        let err = resolve_next(&edges, "classify", StepOutcome::Succeeded, &ctx_with_type("form"))
            .unwrap_err();
        assert!(matches!(err, FlowError::Configuration { ref message } if message.contains("ambiguous")));
    }

    #[test]
    fn test_missing_edge_is_configuration_error() {
        let edges = vec![edge(
            StepOutcome::Succeeded,
            Some(Guard::equals("document_type", "form")),
            Target::End,
        )];

        let err = resolve_next(&edges, "classify", StepOutcome::Succeeded, &ctx_with_type("invoice"))
            .unwrap_err();
        assert!(err.is_fatal());

        let err = resolve_next(&[], "classify", StepOutcome::Skipped, &Context::new()).unwrap_err();
        assert!(matches!(err, FlowError::Configuration { .. }));
    }
}
