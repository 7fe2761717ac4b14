//! Reference tables behind schedules and enrolment: grupos, materias,
//! profesores.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_grupos_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let nombre = match req.params.get("nombre").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing nombre", None),
    };
    let grado = match req.params.get("grado").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing grado", None),
    };

    let grupo_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grupos(id, nombre, grado) VALUES(?, ?, ?)",
        (&grupo_id, &nombre, &grado),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grupos" })),
        );
    }

    ok(&req.id, json!({ "grupoId": grupo_id, "nombre": nombre }))
}

fn handle_grupos_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "grupos": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           g.id,
           g.nombre,
           g.grado,
           (SELECT COUNT(*) FROM estudiantes e
            WHERE e.grupo_id = g.id AND e.ciclo = 'activo') AS estudiante_count
         FROM grupos g
         ORDER BY g.grado, g.nombre",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let nombre: String = row.get(1)?;
            let grado: String = row.get(2)?;
            let estudiante_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "nombre": nombre,
                "grado": grado,
                "estudianteCount": estudiante_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(grupos) => ok(&req.id, json!({ "grupos": grupos })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_materias_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let nombre = match req.params.get("nombre").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing nombre", None),
    };

    let materia_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO materias(id, nombre) VALUES(?, ?)",
        (&materia_id, &nombre),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "materias" })),
        );
    }

    ok(&req.id, json!({ "materiaId": materia_id, "nombre": nombre }))
}

fn handle_materias_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "materias": [] }));
    };

    let mut stmt = match conn.prepare("SELECT id, nombre FROM materias ORDER BY nombre") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let nombre: String = row.get(1)?;
            Ok(json!({ "id": id, "nombre": nombre }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(materias) => ok(&req.id, json!({ "materias": materias })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_profesores_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let nombre = match req.params.get("nombre").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing nombre", None),
    };
    let apellido = match req.params.get("apellido").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing apellido", None),
    };
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    let profesor_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO profesores(id, nombre, apellido, email, ciclo)
         VALUES(?, ?, ?, ?, 'activo')",
        (&profesor_id, &nombre, &apellido, &email),
    ) {
        // UNIQUE(email) is the only constraint that can trip here.
        if e.to_string().contains("UNIQUE") {
            return err(
                &req.id,
                "conflict",
                "email ya registrado para otro profesor",
                Some(json!({ "email": email })),
            );
        }
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "profesores" })),
        );
    }

    ok(&req.id, json!({ "profesorId": profesor_id }))
}

fn handle_profesores_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "profesores": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, nombre, apellido, email, ciclo
         FROM profesores
         ORDER BY apellido, nombre",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let nombre: String = row.get(1)?;
            let apellido: String = row.get(2)?;
            let email: Option<String> = row.get(3)?;
            let ciclo: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "nombre": nombre,
                "apellido": apellido,
                "email": email,
                "ciclo": ciclo
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(profesores) => ok(&req.id, json!({ "profesores": profesores })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grupos.create" => Some(handle_grupos_create(state, req)),
        "grupos.list" => Some(handle_grupos_list(state, req)),
        "materias.create" => Some(handle_materias_create(state, req)),
        "materias.list" => Some(handle_materias_list(state, req)),
        "profesores.create" => Some(handle_profesores_create(state, req)),
        "profesores.list" => Some(handle_profesores_list(state, req)),
        _ => None,
    }
}
