//! `sift query`: ask what a type or member kept.

use sift_engine::runtime::LookupEntry;
use sift_engine::MetadataTable;

use super::Session;
use crate::output::StyledOutput;

/// A member query: `Owner::Name` with an optional `(signature)`
#[derive(Debug, PartialEq, Eq)]
struct MemberQuery<'a> {
    owner: &'a str,
    name: &'a str,
    signature: Option<&'a str>,
}

fn parse_member_query(text: &str) -> Option<MemberQuery<'_>> {
    let split = text.rfind("::")?;
    let owner = &text[..split];
    let rest = &text[split + 2..];
    match rest.find('(') {
        Some(open) if rest.ends_with(')') => Some(MemberQuery {
            owner,
            name: &rest[..open],
            signature: Some(&rest[open + 1..rest.len() - 1]),
        }),
        _ => Some(MemberQuery {
            owner,
            name: rest,
            signature: None,
        }),
    }
}

pub fn execute(session: &Session, target: &str, out: &mut StyledOutput) -> anyhow::Result<()> {
    let found = match parse_member_query(target) {
        Some(query) => query_member(session, &query, out),
        None => query_type(session, target, out),
    };
    out.flush();
    if !found {
        anyhow::bail!("No metadata retained for '{}'", target);
    }
    Ok(())
}

fn query_type(session: &Session, name: &str, out: &mut StyledOutput) -> bool {
    let report = session.plan.report(&session.program, &session.table);
    let Some(ty) = report.find_type(name) else {
        return false;
    };

    out.bold(&ty.name);
    out.newline();
    out.plain("  tier       ");
    out.tier(ty.tier);
    out.newline();
    out.plain(&format!("  browsable  {}", ty.browsable));
    out.newline();
    out.plain(&format!("  handle     {}", ty.handle));
    out.newline();
    if report.static_bases.iter().any(|s| s == name) {
        out.plain("  statics    retained");
        out.newline();
    }
    if !ty.interfaces.is_empty() {
        out.plain(&format!("  interfaces {}", ty.interfaces.join(", ")));
        out.newline();
    }
    true
}

fn query_member(session: &Session, query: &MemberQuery<'_>, out: &mut StyledOutput) -> bool {
    let lookup = MetadataTable::build(&session.program, &session.table, &session.plan);
    let mut found = false;
    for (name, entry) in lookup.iter() {
        if name.owner != query.owner || name.name != query.name {
            continue;
        }
        if query.signature.is_some_and(|sig| sig != name.signature) {
            continue;
        }
        let invokable = matches!(entry, LookupEntry::Thunk(_));
        out.entry_badge(invokable);
        out.plain(&format!(" {}::{}", name.owner, name.name));
        if !name.signature.is_empty() {
            out.plain(&format!("({})", name.signature));
        }
        if let LookupEntry::Thunk(thunk) = entry {
            out.dim(&format!("  {}", thunk));
        }
        out.newline();
        found = true;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member_query() {
        assert_eq!(parse_member_query("Order"), None);
        assert_eq!(
            parse_member_query("G<>::Describe"),
            Some(MemberQuery {
                owner: "G<>",
                name: "Describe",
                signature: None
            })
        );
        assert_eq!(
            parse_member_query("Ns.Map<,>::Add(!0, !1)"),
            Some(MemberQuery {
                owner: "Ns.Map<,>",
                name: "Add",
                signature: Some("!0, !1")
            })
        );
        assert_eq!(
            parse_member_query("App::Main()").unwrap().signature,
            Some("")
        );
    }
}
