// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request file codec: structured header + markdown body.

use asb_core::{Priority, Request, RequestId, RequestKind, RequestStatus};
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::StoreError;
use crate::header::{self, HeaderDoc};

/// Parse a request file.
///
/// `service` is the routing key, taken from the inbox directory the file
/// was found in (requests parsed out of the archive pass the `to` field).
pub fn parse_request(text: &str, path: &Path, service: &str) -> Result<Request, StoreError> {
    let mut doc = header::parse(text);

    let id = required(&mut doc, "id", path)?;
    let from = required(&mut doc, "from", path)?;
    let to = required(&mut doc, "to", path)?;
    let scope = required(&mut doc, "scope", path)?;
    let kind: RequestKind = parse_field(&required(&mut doc, "type", path)?, path)?;
    let priority: Priority = parse_field(&required(&mut doc, "priority", path)?, path)?;
    let status: RequestStatus = parse_field(&required(&mut doc, "status", path)?, path)?;
    let created = timestamp(&required(&mut doc, "created", path)?, path)?;
    let updated = timestamp(&required(&mut doc, "updated", path)?, path)?;

    let attempts = match doc.take("attempts") {
        Some(raw) => raw.parse::<u32>().map_err(|_| StoreError::Parse {
            path: path.to_path_buf(),
            reason: format!("invalid attempts value '{raw}'"),
        })?,
        None => 0,
    };

    let depends_on = doc
        .take("depends_on_requests")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(RequestId::from)
                .collect()
        })
        .unwrap_or_default();

    let directive = doc.take("directive");
    let related_contract = doc.take("related_contract");
    let command = doc.take("command");
    let command_args = doc.take("command_args");
    let originated_from = doc.take("originated_from").map(|s| RequestId::from(&*s));

    if kind == RequestKind::Command && command.is_none() {
        return Err(StoreError::Parse {
            path: path.to_path_buf(),
            reason: "command request without a command field".into(),
        });
    }

    Ok(Request {
        id: RequestId::new(id.into_inner()),
        title: doc.title.clone(),
        from: from.into_inner(),
        to: to.into_inner(),
        scope: scope.into_inner(),
        service: service.to_string(),
        kind,
        priority,
        status,
        created,
        updated,
        attempts,
        depends_on,
        directive,
        related_contract,
        command,
        command_args,
        originated_from,
        extra: doc.fields.clone(),
        body: doc.body.clone(),
        path: path.to_path_buf(),
    })
}

/// Render a request back into file form.
///
/// Known fields are written in canonical order; unknown fields follow in
/// their original order; the body is reproduced verbatim.
#[must_use]
pub fn render_request(req: &Request) -> String {
    let mut fields: Vec<(String, String)> = vec![
        ("id".into(), req.id.to_string()),
        ("from".into(), req.from.clone()),
        ("to".into(), req.to.clone()),
        ("scope".into(), req.scope.clone()),
        ("type".into(), req.kind.to_string()),
        ("priority".into(), req.priority.to_string()),
        ("status".into(), req.status.to_string()),
        ("created".into(), rfc3339(req.created)),
        ("updated".into(), rfc3339(req.updated)),
    ];

    if req.attempts > 0 {
        fields.push(("attempts".into(), req.attempts.to_string()));
    }
    if !req.depends_on.is_empty() {
        let ids: Vec<&str> = req.depends_on.iter().map(RequestId::as_str).collect();
        fields.push(("depends_on_requests".into(), ids.join(", ")));
    }
    if let Some(directive) = &req.directive {
        fields.push(("directive".into(), directive.clone()));
    }
    if let Some(contract) = &req.related_contract {
        fields.push(("related_contract".into(), contract.clone()));
    }
    if let Some(command) = &req.command {
        fields.push(("command".into(), command.clone()));
    }
    if let Some(args) = &req.command_args {
        fields.push(("command_args".into(), args.clone()));
    }
    if let Some(origin) = &req.originated_from {
        fields.push(("originated_from".into(), origin.to_string()));
    }
    for (key, value) in &req.extra {
        fields.push((key.clone(), value.clone()));
    }

    header::render(&HeaderDoc {
        title: req.title.clone(),
        fields,
        body: req.body.clone(),
    })
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Wrapper so `required` values can be moved out without extra clones.
struct Field(String);

impl Field {
    fn into_inner(self) -> String {
        self.0
    }
}

impl std::ops::Deref for Field {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

fn required(doc: &mut HeaderDoc, key: &'static str, path: &Path) -> Result<Field, StoreError> {
    doc.take(key).map(Field).ok_or_else(|| StoreError::Parse {
        path: path.to_path_buf(),
        reason: format!("missing required field '{key}'"),
    })
}

fn parse_field<T>(raw: &str, path: &Path) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        reason: format!("{e}"),
    })
}

fn timestamp(raw: &str, path: &Path) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            reason: format!("invalid timestamp '{raw}': {e}"),
        })
}
