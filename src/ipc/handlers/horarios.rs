//! Weekly schedule blocks. Writes go through a conflict check scoped to the
//! group and, independently, to the teacher: a candidate must clear both.
//! The check and the write share one transaction so two concurrent
//! submissions cannot both pass on a stale read.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, Bloque};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
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

struct Candidato {
    grupo_id: String,
    profesor_id: String,
    materia_id: String,
    dia_semana: String,
    hora_inicio: String,
    hora_fin: String,
    aula: Option<String>,
    inicio: u32,
    fin: u32,
}

fn parse_candidato(params: &serde_json::Value) -> Result<Candidato, HandlerErr> {
    let grupo_id = get_required_str(params, "grupo_id")?;
    let profesor_id = get_required_str(params, "profesor_id")?;
    let materia_id = get_required_str(params, "materia_id")?;
    let dia_semana = get_required_str(params, "dia_semana")?;
    if !schedule::es_dia_habil(&dia_semana) {
        return Err(bad_params("dia_semana must be Lunes..Viernes"));
    }
    let hora_inicio = get_required_str(params, "hora_inicio")?;
    let hora_fin = get_required_str(params, "hora_fin")?;
    let inicio = schedule::parse_hora(&hora_inicio)
        .ok_or_else(|| bad_params("hora_inicio must be HH:MM"))?;
    let fin =
        schedule::parse_hora(&hora_fin).ok_or_else(|| bad_params("hora_fin must be HH:MM"))?;
    if inicio >= fin {
        return Err(bad_params("hora_inicio must be before hora_fin"));
    }
    let aula = params
        .get("aula")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(Candidato {
        grupo_id,
        profesor_id,
        materia_id,
        dia_semana,
        hora_inicio,
        hora_fin,
        aula,
        inicio,
        fin,
    })
}

fn ref_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    // Closed set of reference tables; never caller-supplied.
    let sql = match table {
        "grupos" => "SELECT 1 FROM grupos WHERE id = ?",
        "profesores" => "SELECT 1 FROM profesores WHERE id = ?",
        "materias" => "SELECT 1 FROM materias WHERE id = ?",
        _ => unreachable!("unknown reference table"),
    };
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err)
}

fn check_referencias(conn: &Connection, c: &Candidato) -> Result<(), HandlerErr> {
    for (table, id, label) in [
        ("grupos", c.grupo_id.as_str(), "grupo"),
        ("profesores", c.profesor_id.as_str(), "profesor"),
        ("materias", c.materia_id.as_str(), "materia"),
    ] {
        if !ref_exists(conn, table, id)? {
            return Err(HandlerErr {
                code: "not_found",
                message: format!("{} no encontrado", label),
                details: Some(json!({ "id": id })),
            });
        }
    }
    Ok(())
}

fn bloques_del_dia(
    conn: &Connection,
    owner_column: &str,
    owner_id: &str,
    dia_semana: &str,
) -> Result<Vec<Bloque>, HandlerErr> {
    // owner_column comes from the two fixed call sites below.
    let sql = format!(
        "SELECT id, dia_semana, hora_inicio, hora_fin
         FROM horarios
         WHERE {} = ? AND dia_semana = ?",
        owner_column
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map([owner_id, dia_semana], |r| {
            let id: String = r.get(0)?;
            let dia: String = r.get(1)?;
            let hora_inicio: String = r.get(2)?;
            let hora_fin: String = r.get(3)?;
            Ok((id, dia, hora_inicio, hora_fin))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut bloques = Vec::with_capacity(rows.len());
    for (id, dia_semana, hora_inicio, hora_fin) in rows {
        let (Some(inicio), Some(fin)) = (
            schedule::parse_hora(&hora_inicio),
            schedule::parse_hora(&hora_fin),
        ) else {
            // Stored rows are validated on write; a bad one is a corrupt row.
            return Err(HandlerErr {
                code: "db_query_failed",
                message: format!("horario {} has malformed times", id),
                details: None,
            });
        };
        bloques.push(Bloque {
            id,
            dia_semana,
            inicio,
            fin,
        });
    }
    Ok(bloques)
}

/// Runs the group-scoped and teacher-scoped checks. Both must pass.
fn check_conflictos(
    conn: &Connection,
    c: &Candidato,
    excluir_id: Option<&str>,
) -> Result<(), HandlerErr> {
    for (owner_column, owner_id, scope) in [
        ("grupo_id", c.grupo_id.as_str(), "grupo"),
        ("profesor_id", c.profesor_id.as_str(), "profesor"),
    ] {
        let bloques = bloques_del_dia(conn, owner_column, owner_id, &c.dia_semana)?;
        if let Some(choque) =
            schedule::buscar_conflicto(&bloques, &c.dia_semana, c.inicio, c.fin, excluir_id)
        {
            return Err(HandlerErr {
                code: "conflict",
                message: format!("choque de horario para el {}", scope),
                details: Some(json!({
                    "scope": scope,
                    "horarioId": choque.id,
                    "diaSemana": c.dia_semana
                })),
            });
        }
    }
    Ok(())
}

fn horarios_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let c = parse_candidato(params)?;
    check_referencias(conn, &c)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    check_conflictos(&tx, &c, None)?;

    let horario_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO horarios(id, grupo_id, profesor_id, materia_id, dia_semana,
            hora_inicio, hora_fin, aula)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &horario_id,
            &c.grupo_id,
            &c.profesor_id,
            &c.materia_id,
            &c.dia_semana,
            &c.hora_inicio,
            &c.hora_fin,
            &c.aula,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "horarios" })),
    })?;

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "horarioId": horario_id }))
}

fn horarios_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let horario_id = get_required_str(params, "horario_id")?;
    let c = parse_candidato(params)?;

    let exists = conn
        .query_row("SELECT 1 FROM horarios WHERE id = ?", [&horario_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_err)?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "horario no encontrado".to_string(),
            details: Some(json!({ "horarioId": horario_id })),
        });
    }
    check_referencias(conn, &c)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    // The edited row is excluded so re-saving an unchanged slot is not a
    // self-conflict.
    check_conflictos(&tx, &c, Some(&horario_id))?;

    tx.execute(
        "UPDATE horarios SET grupo_id = ?, profesor_id = ?, materia_id = ?,
            dia_semana = ?, hora_inicio = ?, hora_fin = ?, aula = ?
         WHERE id = ?",
        (
            &c.grupo_id,
            &c.profesor_id,
            &c.materia_id,
            &c.dia_semana,
            &c.hora_inicio,
            &c.hora_fin,
            &c.aula,
            &horario_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "horarios" })),
    })?;

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "horarioId": horario_id }))
}

fn horarios_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = "SELECT h.id, h.grupo_id, h.profesor_id, h.materia_id, h.dia_semana,
            h.hora_inicio, h.hora_fin, h.aula, m.nombre
         FROM horarios h
         JOIN materias m ON m.id = h.materia_id
         WHERE 1=1"
        .to_string();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(grupo_id) = params.get("grupo_id").and_then(|v| v.as_str()) {
        sql.push_str(" AND h.grupo_id = ?");
        binds.push(Value::Text(grupo_id.to_string()));
    }
    if let Some(profesor_id) = params.get("profesor_id").and_then(|v| v.as_str()) {
        sql.push_str(" AND h.profesor_id = ?");
        binds.push(Value::Text(profesor_id.to_string()));
    }
    sql.push_str(
        " ORDER BY CASE h.dia_semana
            WHEN 'Lunes' THEN 1 WHEN 'Martes' THEN 2 WHEN 'Miercoles' THEN 3
            WHEN 'Jueves' THEN 4 WHEN 'Viernes' THEN 5 END,
          h.hora_inicio",
    );

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let horarios = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let grupo_id: String = r.get(1)?;
            let profesor_id: String = r.get(2)?;
            let materia_id: String = r.get(3)?;
            let dia_semana: String = r.get(4)?;
            let hora_inicio: String = r.get(5)?;
            let hora_fin: String = r.get(6)?;
            let aula: Option<String> = r.get(7)?;
            let materia_nombre: String = r.get(8)?;
            Ok(json!({
                "id": id,
                "grupoId": grupo_id,
                "profesorId": profesor_id,
                "materiaId": materia_id,
                "materiaNombre": materia_nombre,
                "diaSemana": dia_semana,
                "horaInicio": hora_inicio,
                "horaFin": hora_fin,
                "aula": aula
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "horarios": horarios }))
}

fn horarios_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let horario_id = get_required_str(params, "horario_id")?;
    let borrados = conn
        .execute("DELETE FROM horarios WHERE id = ?", [&horario_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "horarios" })),
        })?;
    if borrados == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "horario no encontrado".to_string(),
            details: Some(json!({ "horarioId": horario_id })),
        });
    }
    Ok(json!({ "ok": true }))
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
        "horarios.create" => Some(with_conn(state, req, horarios_create)),
        "horarios.update" => Some(with_conn(state, req, horarios_update)),
        "horarios.list" => Some(with_conn(state, req, horarios_list)),
        "horarios.delete" => Some(with_conn(state, req, horarios_delete)),
        _ => None,
    }
}
