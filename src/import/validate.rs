//! Dry-run validation: resolve every reference inside a parsed context
//! without touching a store.

use super::{ImportContext, Issue};
use crate::model::{Entity, EntityType, Link};
use std::collections::{HashMap, HashSet};

type KeySets = HashMap<EntityType, HashSet<String>>;

fn collect_keys<T: Entity>(items: &[T], sets: &mut KeySets, issues: &mut Vec<Issue>) {
    let set = sets.entry(T::KIND).or_default();
    for item in items {
        if !set.insert(item.import_key().to_string()) {
            issues.push(Issue::error(
                T::KIND.step_name(),
                None,
                "duplicate_key",
                format!("import key {} is used twice", item.import_key()),
            ));
        }
    }
}

fn check_links<T: Entity>(items: &[T], sets: &KeySets, issues: &mut Vec<Issue>) {
    let table = T::KIND.step_name();
    for item in items {
        for (field, link) in item.links() {
            let Some(decl) = T::KIND.reference(field) else {
                continue;
            };
            match link {
                Link::Unset if decl.required => issues.push(
                    Issue::error(
                        table,
                        None,
                        "missing_reference",
                        format!("{} {}: required {field} is empty", T::KIND, item.import_key()),
                    )
                    .with_field(field),
                ),
                Link::Unset => {}
                Link::Id(id) => issues.push(
                    Issue::error(
                        table,
                        None,
                        "unexpected_id",
                        format!(
                            "{} {}: {field} already holds store id {id}",
                            T::KIND,
                            item.import_key()
                        ),
                    )
                    .with_field(field),
                ),
                Link::Key(key) => {
                    let known = sets
                        .get(&decl.target)
                        .map(|s| s.contains(key))
                        .unwrap_or(false);
                    if known {
                        continue;
                    }
                    let message = format!(
                        "{} {}: {field} points to missing {} key {key}",
                        T::KIND,
                        item.import_key(),
                        decl.target
                    );
                    let issue = if decl.required {
                        Issue::error(table, None, "unresolved_reference", message)
                    } else {
                        Issue::warning(table, None, "unresolved_optional_reference", message)
                    };
                    issues.push(issue.with_field(field));
                }
            }
        }
    }
}

/// Validate a context, returning every issue found. Any issue of error
/// severity would make the commit stage fail.
pub fn validate(ctx: &ImportContext) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut sets = KeySets::new();

    collect_keys(&ctx.campuses, &mut sets, &mut issues);
    collect_keys(&ctx.services, &mut sets, &mut issues);
    collect_keys(&ctx.service_times, &mut sets, &mut issues);
    collect_keys(&ctx.households, &mut sets, &mut issues);
    collect_keys(&ctx.people, &mut sets, &mut issues);
    collect_keys(&ctx.groups, &mut sets, &mut issues);
    collect_keys(&ctx.group_service_times, &mut sets, &mut issues);
    collect_keys(&ctx.group_members, &mut sets, &mut issues);
    collect_keys(&ctx.sessions, &mut sets, &mut issues);
    collect_keys(&ctx.visits, &mut sets, &mut issues);
    collect_keys(&ctx.visit_sessions, &mut sets, &mut issues);
    collect_keys(&ctx.funds, &mut sets, &mut issues);
    collect_keys(&ctx.donation_batches, &mut sets, &mut issues);
    collect_keys(&ctx.donations, &mut sets, &mut issues);
    collect_keys(&ctx.fund_donations, &mut sets, &mut issues);
    collect_keys(&ctx.forms, &mut sets, &mut issues);
    collect_keys(&ctx.questions, &mut sets, &mut issues);
    collect_keys(&ctx.form_submissions, &mut sets, &mut issues);
    collect_keys(&ctx.answers, &mut sets, &mut issues);

    check_links(&ctx.services, &sets, &mut issues);
    check_links(&ctx.service_times, &sets, &mut issues);
    check_links(&ctx.people, &sets, &mut issues);
    check_links(&ctx.group_service_times, &sets, &mut issues);
    check_links(&ctx.group_members, &sets, &mut issues);
    check_links(&ctx.sessions, &sets, &mut issues);
    check_links(&ctx.visits, &sets, &mut issues);
    check_links(&ctx.visit_sessions, &sets, &mut issues);
    check_links(&ctx.donations, &sets, &mut issues);
    check_links(&ctx.fund_donations, &sets, &mut issues);
    check_links(&ctx.questions, &sets, &mut issues);
    check_links(&ctx.form_submissions, &sets, &mut issues);
    check_links(&ctx.answers, &sets, &mut issues);

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Campus, Service, Session};

    #[test]
    fn clean_context_has_no_issues() {
        let mut ctx = ImportContext::default();
        ctx.campuses.push(Campus {
            import_key: "1".into(),
            name: "Main".into(),
            ..Campus::default()
        });
        ctx.services.push(Service {
            import_key: "1".into(),
            campus_id: Link::key("1"),
            name: "Sunday".into(),
            ..Service::default()
        });
        assert!(validate(&ctx).is_empty());
    }

    #[test]
    fn reports_missing_required_and_optional_targets() {
        let mut ctx = ImportContext::default();
        ctx.services.push(Service {
            import_key: "1".into(),
            campus_id: Link::key("9"),
            name: "Sunday".into(),
            ..Service::default()
        });
        ctx.sessions.push(Session {
            import_key: "1".into(),
            group_id: Link::Unset,
            service_time_id: Link::key("4"),
            ..Session::default()
        });
        let issues = validate(&ctx);
        let codes: Vec<(&str, bool)> = issues
            .iter()
            .map(|i| (i.code.as_str(), i.is_error()))
            .collect();
        assert_eq!(
            codes,
            vec![
                ("unresolved_reference", true),
                ("missing_reference", true),
                ("unresolved_optional_reference", false),
            ]
        );
        assert_eq!(issues[0].field.as_deref(), Some("campusId"));
    }

    #[test]
    fn duplicate_import_keys_are_errors() {
        let mut ctx = ImportContext::default();
        for _ in 0..2 {
            ctx.campuses.push(Campus {
                import_key: "1".into(),
                name: "Main".into(),
                ..Campus::default()
            });
        }
        let issues = validate(&ctx);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "duplicate_key");
    }
}
