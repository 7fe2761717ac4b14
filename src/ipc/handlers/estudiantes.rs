//! Students and their guardians (acudientes). Creation is all-or-nothing:
//! a student row and its nested guardian rows commit together or not at all.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Lifecycle of an enrolment. Stored as text; this is the closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ciclo {
    Activo,
    Retirado,
}

impl Ciclo {
    fn as_str(&self) -> &'static str {
        match self {
            Ciclo::Activo => "activo",
            Ciclo::Retirado => "retirado",
        }
    }

    fn parse(s: &str) -> Option<Ciclo> {
        match s {
            "activo" => Some(Ciclo::Activo),
            "retirado" => Some(Ciclo::Retirado),
            _ => None,
        }
    }
}

fn grupo_exists(conn: &Connection, grupo_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM grupos WHERE id = ?", [grupo_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

struct NuevoAcudiente {
    nombre: String,
    parentesco: Option<String>,
    telefono: Option<String>,
    email: Option<String>,
}

fn parse_acudientes(params: &serde_json::Value) -> Result<Vec<NuevoAcudiente>, HandlerErr> {
    let Some(raw) = params.get("acudientes") else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(bad_params("acudientes must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let nombre = item
            .get("nombre")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| bad_params(format!("acudientes[{}] missing nombre", i)))?;
        out.push(NuevoAcudiente {
            nombre,
            parentesco: get_optional_str(item, "parentesco"),
            telefono: get_optional_str(item, "telefono"),
            email: get_optional_str(item, "email"),
        });
    }
    Ok(out)
}

fn estudiantes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let nombre = get_required_str(params, "nombre")?;
    let apellido = get_required_str(params, "apellido")?;
    let documento = get_optional_str(params, "documento");
    let grupo_id = get_optional_str(params, "grupo_id");
    let fecha_ingreso = get_optional_str(params, "fecha_ingreso");
    // Validate the whole payload before the first write so a bad guardian
    // entry never costs a rollback.
    let acudientes = parse_acudientes(params)?;

    if let Some(gid) = grupo_id.as_deref() {
        if !grupo_exists(conn, gid)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "grupo no encontrado".to_string(),
                details: Some(json!({ "grupoId": gid })),
            });
        }
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let estudiante_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO estudiantes(id, nombre, apellido, documento, grupo_id, ciclo,
            fecha_ingreso, updated_at)
         VALUES(?, ?, ?, ?, ?, 'activo', ?, ?)",
        (
            &estudiante_id,
            &nombre,
            &apellido,
            &documento,
            &grupo_id,
            &fecha_ingreso,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "estudiantes" })),
    })?;

    let mut acudiente_ids = Vec::with_capacity(acudientes.len());
    for a in &acudientes {
        let acudiente_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO acudientes(id, estudiante_id, nombre, parentesco, telefono, email)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &acudiente_id,
                &estudiante_id,
                &a.nombre,
                &a.parentesco,
                &a.telefono,
                &a.email,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "acudientes" })),
        })?;
        acudiente_ids.push(acudiente_id);
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "estudianteId": estudiante_id,
        "acudienteIds": acudiente_ids
    }))
}

fn estudiantes_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = "SELECT id, nombre, apellido, documento, grupo_id, ciclo, fecha_ingreso
         FROM estudiantes WHERE 1=1"
        .to_string();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(grupo_id) = params.get("grupo_id").and_then(|v| v.as_str()) {
        sql.push_str(" AND grupo_id = ?");
        binds.push(Value::Text(grupo_id.to_string()));
    }
    match params.get("ciclo").and_then(|v| v.as_str()) {
        Some("todos") => {}
        Some(c) => {
            let ciclo = Ciclo::parse(c)
                .ok_or_else(|| bad_params("ciclo must be activo|retirado|todos"))?;
            sql.push_str(" AND ciclo = ?");
            binds.push(Value::Text(ciclo.as_str().to_string()));
        }
        None => {
            sql.push_str(" AND ciclo = 'activo'");
        }
    }
    sql.push_str(" ORDER BY apellido, nombre");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let estudiantes = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let nombre: String = r.get(1)?;
            let apellido: String = r.get(2)?;
            let documento: Option<String> = r.get(3)?;
            let grupo_id: Option<String> = r.get(4)?;
            let ciclo: String = r.get(5)?;
            let fecha_ingreso: Option<String> = r.get(6)?;
            Ok((
                id.clone(),
                json!({
                    "id": id,
                    "nombre": nombre,
                    "apellido": apellido,
                    "documento": documento,
                    "grupoId": grupo_id,
                    "ciclo": ciclo,
                    "fechaIngreso": fecha_ingreso
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    // One bulk guardian fetch keyed by the student id set, grouped in
    // memory, instead of one query per student.
    let mut por_estudiante: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    if !estudiantes.is_empty() {
        let placeholders = vec!["?"; estudiantes.len()].join(", ");
        let sql = format!(
            "SELECT estudiante_id, id, nombre, parentesco, telefono, email
             FROM acudientes
             WHERE estudiante_id IN ({})
             ORDER BY nombre",
            placeholders
        );
        let binds: Vec<Value> = estudiantes
            .iter()
            .map(|(id, _)| Value::Text(id.clone()))
            .collect();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let acudientes = stmt
            .query_map(params_from_iter(binds), |r| {
                let estudiante_id: String = r.get(0)?;
                let id: String = r.get(1)?;
                let nombre: String = r.get(2)?;
                let parentesco: Option<String> = r.get(3)?;
                let telefono: Option<String> = r.get(4)?;
                let email: Option<String> = r.get(5)?;
                Ok((
                    estudiante_id,
                    json!({
                        "id": id,
                        "nombre": nombre,
                        "parentesco": parentesco,
                        "telefono": telefono,
                        "email": email
                    }),
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        for (estudiante_id, acudiente) in acudientes {
            por_estudiante.entry(estudiante_id).or_default().push(acudiente);
        }
    }

    let rows: Vec<serde_json::Value> = estudiantes
        .into_iter()
        .map(|(id, mut e)| {
            e["acudientes"] = json!(por_estudiante.remove(&id).unwrap_or_default());
            e
        })
        .collect();

    Ok(json!({ "estudiantes": rows }))
}

fn load_ciclo(conn: &Connection, estudiante_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT ciclo FROM estudiantes WHERE id = ?",
        [estudiante_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "estudiante no encontrado".to_string(),
        details: Some(json!({ "estudianteId": estudiante_id })),
    })
}

fn estudiantes_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let estudiante_id = get_required_str(params, "estudiante_id")?;
    let _ = load_ciclo(conn, &estudiante_id)?;

    let mut sets: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(nombre) = get_optional_str(params, "nombre") {
        sets.push("nombre = ?");
        binds.push(Value::Text(nombre));
    }
    if let Some(apellido) = get_optional_str(params, "apellido") {
        sets.push("apellido = ?");
        binds.push(Value::Text(apellido));
    }
    if let Some(documento) = get_optional_str(params, "documento") {
        sets.push("documento = ?");
        binds.push(Value::Text(documento));
    }
    if let Some(grupo_id) = get_optional_str(params, "grupo_id") {
        if !grupo_exists(conn, &grupo_id)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "grupo no encontrado".to_string(),
                details: Some(json!({ "grupoId": grupo_id })),
            });
        }
        sets.push("grupo_id = ?");
        binds.push(Value::Text(grupo_id));
    }
    if sets.is_empty() {
        return Err(bad_params("no fields to update"));
    }
    sets.push("updated_at = ?");
    binds.push(Value::Text(Utc::now().to_rfc3339()));
    binds.push(Value::Text(estudiante_id.clone()));

    let sql = format!("UPDATE estudiantes SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, params_from_iter(binds))
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "estudiantes" })),
        })?;

    Ok(json!({ "estudianteId": estudiante_id }))
}

fn estudiantes_retirar(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let estudiante_id = get_required_str(params, "estudiante_id")?;
    let ciclo = load_ciclo(conn, &estudiante_id)?;
    if ciclo == Ciclo::Retirado.as_str() {
        return Err(HandlerErr {
            code: "conflict",
            message: "el estudiante ya esta retirado".to_string(),
            details: Some(json!({ "estudianteId": estudiante_id })),
        });
    }

    conn.execute(
        "UPDATE estudiantes SET ciclo = 'retirado', updated_at = ? WHERE id = ?",
        (Utc::now().to_rfc3339(), &estudiante_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "estudiantes" })),
    })?;

    Ok(json!({
        "estudianteId": estudiante_id,
        "ciclo": Ciclo::Retirado.as_str()
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "estudiantes.create" => Some(with_conn(state, req, estudiantes_create)),
        "estudiantes.list" => Some(with_conn(state, req, estudiantes_list)),
        "estudiantes.update" => Some(with_conn(state, req, estudiantes_update)),
        "estudiantes.retirar" => Some(with_conn(state, req, estudiantes_retirar)),
        _ => None,
    }
}
