//! Command Executor
//!
//! Turns a tokenized [`Command`] into an [`Operation`] and applies it to the
//! store. All validation and the complete replacement object are computed
//! before the store is written, so an error never leaves a partial mutation.
//! Given the same store state and command the result is always the same,
//! which is what makes the durable log replayable.
//!
//! ```text
//! SET key id [FIELD name value ...] [NX|XX] [POINT lat lon | BOUNDS minlat minlon maxlat maxlon | OBJECT geojson | STRING value]
//! FSET key id [XX] name value [name value ...]
//! DEL key id
//! ```

use chrono::Utc;

use crate::errors::{PipelineError, Result};
use crate::geo::{Geometry, Position};
use crate::model::{
    ChangeKind, Command, CommandDetail, FsetOp, Object, OpKind, Operation, SetCondition, SetOp,
};
use crate::store::ObjectStore;

/// Parse and apply in one step
pub fn execute(store: &mut dyn ObjectStore, command: &Command) -> Result<CommandDetail> {
    let operation = parse(command)?;
    apply(store, &operation)
}

pub fn parse(command: &Command) -> Result<Operation> {
    let name = command
        .name()
        .ok_or_else(|| PipelineError::malformed("empty command"))?;
    let rest = &command.args()[1..];

    match name.as_str() {
        "set" => parse_set(Tokens::new("set", rest)),
        "fset" => parse_fset(Tokens::new("fset", rest)),
        "del" => parse_del(Tokens::new("del", rest)),
        other => Err(PipelineError::malformed(format!("unknown command '{other}'"))),
    }
}

pub fn apply(store: &mut dyn ObjectStore, operation: &Operation) -> Result<CommandDetail> {
    match operation {
        Operation::Set(op) => apply_set(store, op),
        Operation::Fset(op) => apply_fset(store, op),
        Operation::Del { key, id } => Ok(apply_del(store, key, id)),
    }
}

struct Tokens<'a> {
    command: &'static str,
    iter: std::slice::Iter<'a, String>,
}

impl<'a> Tokens<'a> {
    fn new(command: &'static str, args: &'a [String]) -> Self {
        Self {
            command,
            iter: args.iter(),
        }
    }

    fn next(&mut self) -> Option<&'a str> {
        self.iter.next().map(String::as_str)
    }

    fn required(&mut self, what: &str) -> Result<&'a str> {
        self.next().ok_or_else(|| {
            PipelineError::malformed(format!("wrong number of arguments for '{}': missing {what}", self.command))
        })
    }

    fn remaining(&self) -> usize {
        self.iter.len()
    }
}

fn coordinate(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| PipelineError::malformed(format!("invalid argument '{raw}'")))
}

fn field_value(name: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| PipelineError::TypeMismatch {
            field: name.to_string(),
            value: raw.to_string(),
        })
}

fn parse_set(mut tokens: Tokens<'_>) -> Result<Operation> {
    let key = tokens.required("key")?.to_string();
    let id = tokens.required("id")?.to_string();
    let mut op = SetOp {
        key,
        id,
        fields: Vec::new(),
        condition: None,
        geometry: None,
        payload: None,
    };

    while let Some(token) = tokens.next() {
        match token.to_ascii_uppercase().as_str() {
            "FIELD" => {
                let name = tokens.required("field name")?;
                let raw = tokens.required("field value")?;
                op.fields.push((name.to_string(), field_value(name, raw)?));
            }
            flag @ ("NX" | "XX") => {
                if op.condition.is_some() {
                    return Err(PipelineError::malformed("NX/XX may only be given once"));
                }
                op.condition = Some(if flag == "NX" {
                    SetCondition::IfNotExists
                } else {
                    SetCondition::IfExists
                });
            }
            "POINT" => {
                ensure_no_geometry(&op)?;
                let lat = coordinate(tokens.required("latitude")?)?;
                let lon = coordinate(tokens.required("longitude")?)?;
                let position = Position::checked(lat, lon)?;
                op.geometry = Some(Geometry::point(position.lat, position.lon));
            }
            "BOUNDS" => {
                ensure_no_geometry(&op)?;
                let min = Position::checked(
                    coordinate(tokens.required("min latitude")?)?,
                    coordinate(tokens.required("min longitude")?)?,
                )?;
                let max = Position::checked(
                    coordinate(tokens.required("max latitude")?)?,
                    coordinate(tokens.required("max longitude")?)?,
                )?;
                if min.lat > max.lat || min.lon > max.lon {
                    return Err(PipelineError::malformed("bounds minimum exceeds maximum"));
                }
                op.geometry = Some(Geometry::bounds(min, max));
            }
            "OBJECT" => {
                ensure_no_geometry(&op)?;
                op.geometry = Some(Geometry::from_geojson(tokens.required("geojson")?)?);
            }
            "STRING" => {
                if op.payload.is_some() {
                    return Err(PipelineError::malformed("STRING may only be given once"));
                }
                op.payload = Some(tokens.required("string value")?.to_string());
            }
            _ => return Err(PipelineError::malformed(format!("unknown argument '{token}'"))),
        }
    }

    if op.fields.is_empty() && op.geometry.is_none() && op.payload.is_none() {
        return Err(PipelineError::malformed(
            "SET needs at least one of FIELD, POINT, BOUNDS, OBJECT or STRING",
        ));
    }
    Ok(Operation::Set(op))
}

fn ensure_no_geometry(op: &SetOp) -> Result<()> {
    if op.geometry.is_some() {
        return Err(PipelineError::malformed("only one geometry may be given"));
    }
    Ok(())
}

fn parse_fset(mut tokens: Tokens<'_>) -> Result<Operation> {
    let key = tokens.required("key")?.to_string();
    let id = tokens.required("id")?.to_string();
    let mut op = FsetOp {
        key,
        id,
        fields: Vec::new(),
        if_exists: false,
    };

    let mut pending = tokens.remaining();
    if pending % 2 == 1 {
        let flag = tokens.required("XX")?;
        if !flag.eq_ignore_ascii_case("xx") {
            return Err(PipelineError::malformed(format!("invalid argument '{flag}'")));
        }
        op.if_exists = true;
        pending -= 1;
    }
    if pending == 0 {
        return Err(PipelineError::malformed("wrong number of arguments for 'fset'"));
    }

    while let Some(name) = tokens.next() {
        let raw = tokens.required("field value")?;
        op.fields.push((name.to_string(), field_value(name, raw)?));
    }
    Ok(Operation::Fset(op))
}

fn parse_del(mut tokens: Tokens<'_>) -> Result<Operation> {
    let key = tokens.required("key")?.to_string();
    let id = tokens.required("id")?.to_string();
    if tokens.remaining() != 0 {
        return Err(PipelineError::malformed("wrong number of arguments for 'del'"));
    }
    Ok(Operation::Del { key, id })
}

fn detail(
    op: OpKind,
    kind: ChangeKind,
    key: &str,
    id: &str,
    previous: Option<Object>,
    new: Option<Object>,
) -> CommandDetail {
    CommandDetail {
        seq: 0,
        op,
        kind,
        key: key.to_string(),
        id: id.to_string(),
        previous,
        new,
        timestamp: Utc::now(),
    }
}

// previous and new both describe the untouched current state
fn noop(op: OpKind, key: &str, id: &str, current: Option<Object>) -> CommandDetail {
    detail(op, ChangeKind::Noop, key, id, current.clone(), current)
}

fn ensure_capacity(store: &dyn ObjectStore) -> Result<()> {
    match store.capacity() {
        Some(limit) if store.len() >= limit => Err(PipelineError::CapacityExceeded { limit }),
        _ => Ok(()),
    }
}

fn apply_set(store: &mut dyn ObjectStore, op: &SetOp) -> Result<CommandDetail> {
    let previous = store.get(&op.key, &op.id).cloned();

    let skip = matches!(
        (op.condition, &previous),
        (Some(SetCondition::IfNotExists), Some(_)) | (Some(SetCondition::IfExists), None)
    );
    if skip {
        return Ok(noop(OpKind::Set, &op.key, &op.id, previous));
    }
    if previous.is_none() {
        ensure_capacity(store)?;
    }

    let mut next = previous.clone().unwrap_or_default();
    for (name, value) in &op.fields {
        next.fields.insert(name.clone(), *value);
    }
    if let Some(geometry) = &op.geometry {
        next.geometry = Some(geometry.clone());
    }
    if let Some(payload) = &op.payload {
        next.payload = Some(payload.clone());
    }

    if previous.as_ref() == Some(&next) {
        return Ok(noop(OpKind::Set, &op.key, &op.id, previous));
    }

    let kind = if previous.is_some() {
        ChangeKind::Update
    } else {
        ChangeKind::Create
    };
    store.upsert(&op.key, &op.id, next.clone());
    Ok(detail(OpKind::Set, kind, &op.key, &op.id, previous, Some(next)))
}

fn apply_fset(store: &mut dyn ObjectStore, op: &FsetOp) -> Result<CommandDetail> {
    let Some(previous) = store.get(&op.key, &op.id).cloned() else {
        if op.if_exists {
            return Ok(noop(OpKind::Fset, &op.key, &op.id, None));
        }
        return Err(PipelineError::NotFound {
            key: op.key.clone(),
            id: op.id.clone(),
        });
    };

    let mut next = previous.clone();
    for (name, value) in &op.fields {
        next.fields.insert(name.clone(), *value);
    }
    if next == previous {
        return Ok(noop(OpKind::Fset, &op.key, &op.id, Some(previous)));
    }

    store.upsert(&op.key, &op.id, next.clone());
    Ok(detail(
        OpKind::Fset,
        ChangeKind::Update,
        &op.key,
        &op.id,
        Some(previous),
        Some(next),
    ))
}

fn apply_del(store: &mut dyn ObjectStore, key: &str, id: &str) -> CommandDetail {
    match store.delete(key, id) {
        Some(previous) => detail(OpKind::Del, ChangeKind::Delete, key, id, Some(previous), None),
        None => noop(OpKind::Del, key, id, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn run(store: &mut MemoryStore, args: &[&str]) -> Result<CommandDetail> {
        execute(store, &Command::new(args.iter().copied()))
    }

    #[test]
    fn test_set_creates_point() {
        let mut store = MemoryStore::new();
        let detail = run(&mut store, &["SET", "fleet", "truck1", "POINT", "33.5", "-112.0"]).unwrap();

        assert_eq!(detail.kind, ChangeKind::Create);
        assert_eq!(detail.op, OpKind::Set);
        assert!(detail.previous.is_none());
        assert_eq!(detail.new_geometry(), Some(&Geometry::point(33.5, -112.0)));
        assert_eq!(store.get("fleet", "truck1"), detail.new.as_ref());
    }

    #[test]
    fn test_set_keeps_unmentioned_values() {
        let mut store = MemoryStore::new();
        run(&mut store, &["SET", "fleet", "truck1", "FIELD", "speed", "10", "POINT", "1", "2"]).unwrap();
        let detail = run(&mut store, &["set", "fleet", "truck1", "FIELD", "fuel", "0.5"]).unwrap();

        assert_eq!(detail.kind, ChangeKind::Update);
        let object = store.get("fleet", "truck1").unwrap();
        assert_eq!(object.geometry, Some(Geometry::point(1.0, 2.0)));
        assert_eq!(object.fields.get("speed"), Some(&10.0));
        assert_eq!(object.fields.get("fuel"), Some(&0.5));
    }

    #[test]
    fn test_set_conditions() {
        let mut store = MemoryStore::new();
        let detail = run(&mut store, &["SET", "fleet", "truck1", "XX", "POINT", "1", "2"]).unwrap();
        assert_eq!(detail.kind, ChangeKind::Noop);
        assert!(store.is_empty());

        run(&mut store, &["SET", "fleet", "truck1", "POINT", "1", "2"]).unwrap();
        let detail = run(&mut store, &["SET", "fleet", "truck1", "NX", "POINT", "3", "4"]).unwrap();
        assert_eq!(detail.kind, ChangeKind::Noop);
        assert_eq!(store.get("fleet", "truck1").unwrap().geometry, Some(Geometry::point(1.0, 2.0)));
    }

    #[test]
    fn test_identical_set_is_noop() {
        let mut store = MemoryStore::new();
        run(&mut store, &["SET", "fleet", "truck1", "POINT", "1", "2"]).unwrap();
        let detail = run(&mut store, &["SET", "fleet", "truck1", "POINT", "1", "2"]).unwrap();
        assert_eq!(detail.kind, ChangeKind::Noop);
        assert_eq!(detail.previous, detail.new);
    }

    #[test]
    fn test_fset_requires_existing_object() {
        let mut store = MemoryStore::new();
        let err = run(&mut store, &["FSET", "fleet", "truck1", "speed", "10"]).unwrap_err();
        assert_eq!(
            err,
            PipelineError::NotFound {
                key: "fleet".into(),
                id: "truck1".into()
            }
        );

        let detail = run(&mut store, &["FSET", "fleet", "truck1", "XX", "speed", "10"]).unwrap();
        assert_eq!(detail.kind, ChangeKind::Noop);

        run(&mut store, &["SET", "fleet", "truck1", "POINT", "1", "2"]).unwrap();
        let detail = run(&mut store, &["FSET", "fleet", "truck1", "speed", "10", "heading", "90"]).unwrap();
        assert_eq!(detail.kind, ChangeKind::Update);
        assert_eq!(detail.new.unwrap().fields.len(), 2);
    }

    #[test]
    fn test_type_mismatch_leaves_store_untouched() {
        let mut store = MemoryStore::new();
        run(&mut store, &["SET", "fleet", "truck1", "FIELD", "speed", "10", "POINT", "1", "2"]).unwrap();
        let before = store.clone();

        let err = run(
            &mut store,
            &["SET", "fleet", "truck1", "FIELD", "speed", "fast", "POINT", "5", "5"],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { ref field, .. } if field == "speed"));
        assert_eq!(store, before);

        let err = run(&mut store, &["FSET", "fleet", "truck1", "speed", "NaN"]).unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { .. }));
        assert_eq!(store, before);
    }

    #[test]
    fn test_malformed_commands() {
        let mut store = MemoryStore::new();
        for args in [
            vec!["SET", "fleet"],
            vec!["SET", "fleet", "truck1"],
            vec!["SET", "fleet", "truck1", "POINT", "1"],
            vec!["SET", "fleet", "truck1", "POINT", "abc", "2"],
            vec!["SET", "fleet", "truck1", "POINT", "91", "2"],
            vec!["SET", "fleet", "truck1", "POINT", "1", "2", "POINT", "3", "4"],
            vec!["SET", "fleet", "truck1", "NX", "XX", "POINT", "1", "2"],
            vec!["SET", "fleet", "truck1", "BOUNDS", "5", "5", "1", "1"],
            vec!["SET", "fleet", "truck1", "WHATEVER"],
            vec!["FSET", "fleet", "truck1"],
            vec!["FSET", "fleet", "truck1", "YY", "speed", "1"],
            vec!["DEL", "fleet"],
            vec!["DEL", "fleet", "truck1", "extra"],
            vec!["GET", "fleet", "truck1"],
        ] {
            let err = run(&mut store, &args).unwrap_err();
            assert!(matches!(err, PipelineError::Malformed(_)), "{args:?} -> {err:?}");
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut store = MemoryStore::with_capacity_limit(1);
        run(&mut store, &["SET", "fleet", "truck1", "POINT", "1", "2"]).unwrap();
        let err = run(&mut store, &["SET", "fleet", "truck2", "POINT", "1", "2"]).unwrap_err();
        assert_eq!(err, PipelineError::CapacityExceeded { limit: 1 });

        // updates are still allowed at the limit
        run(&mut store, &["SET", "fleet", "truck1", "POINT", "3", "4"]).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_del() {
        let mut store = MemoryStore::new();
        run(&mut store, &["SET", "fleet", "truck1", "STRING", "hello"]).unwrap();
        let detail = run(&mut store, &["DEL", "fleet", "truck1"]).unwrap();
        assert_eq!(detail.kind, ChangeKind::Delete);
        assert_eq!(detail.previous.unwrap().payload.as_deref(), Some("hello"));
        assert!(detail.new.is_none());

        let detail = run(&mut store, &["DEL", "fleet", "truck1"]).unwrap();
        assert_eq!(detail.kind, ChangeKind::Noop);
    }

    #[test]
    fn test_execution_is_deterministic() {
        let script: Vec<Vec<&str>> = vec![
            vec!["SET", "a", "1", "POINT", "10", "10"],
            vec!["SET", "a", "2", "BOUNDS", "0", "0", "1", "1"],
            vec!["FSET", "a", "1", "speed", "3"],
            vec!["DEL", "a", "2"],
            vec!["SET", "b", "1", "OBJECT", r#"{"type":"LineString","coordinates":[[0,0],[1,1]]}"#],
        ];
        let mut first = MemoryStore::new();
        let mut second = MemoryStore::new();
        for args in &script {
            run(&mut first, args).unwrap();
            run(&mut second, args).unwrap();
        }
        assert_eq!(first, second);
    }
}
