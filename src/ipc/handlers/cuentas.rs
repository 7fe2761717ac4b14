//! Role-scoped directory lookups. Each role has its own backing table and
//! its own repository implementation; the role string from the request is
//! parsed into a closed enum, never spliced into SQL.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rol {
    Admin,
    Profesor,
    Acudiente,
}

impl Rol {
    fn parse(s: &str) -> Option<Rol> {
        match s {
            "admin" => Some(Rol::Admin),
            "profesor" => Some(Rol::Profesor),
            "acudiente" => Some(Rol::Acudiente),
            _ => None,
        }
    }

    fn repo(self) -> &'static dyn DirectorioRepo {
        match self {
            Rol::Admin => &AdminRepo,
            Rol::Profesor => &ProfesorRepo,
            Rol::Acudiente => &AcudienteRepo,
        }
    }
}

trait DirectorioRepo {
    fn buscar_por_email(
        &self,
        conn: &Connection,
        email: &str,
    ) -> rusqlite::Result<Option<serde_json::Value>>;
}

struct AdminRepo;
struct ProfesorRepo;
struct AcudienteRepo;

impl DirectorioRepo for AdminRepo {
    fn buscar_por_email(
        &self,
        conn: &Connection,
        email: &str,
    ) -> rusqlite::Result<Option<serde_json::Value>> {
        conn.query_row(
            "SELECT id, nombre FROM cuentas_admin WHERE email = ?",
            [email],
            |r| {
                let id: String = r.get(0)?;
                let nombre: String = r.get(1)?;
                Ok(json!({ "id": id, "rol": "admin", "nombre": nombre }))
            },
        )
        .optional()
    }
}

impl DirectorioRepo for ProfesorRepo {
    fn buscar_por_email(
        &self,
        conn: &Connection,
        email: &str,
    ) -> rusqlite::Result<Option<serde_json::Value>> {
        conn.query_row(
            "SELECT id, nombre, apellido, ciclo FROM profesores WHERE email = ?",
            [email],
            |r| {
                let id: String = r.get(0)?;
                let nombre: String = r.get(1)?;
                let apellido: String = r.get(2)?;
                let ciclo: String = r.get(3)?;
                Ok(json!({
                    "id": id,
                    "rol": "profesor",
                    "nombre": nombre,
                    "apellido": apellido,
                    "ciclo": ciclo
                }))
            },
        )
        .optional()
    }
}

impl DirectorioRepo for AcudienteRepo {
    fn buscar_por_email(
        &self,
        conn: &Connection,
        email: &str,
    ) -> rusqlite::Result<Option<serde_json::Value>> {
        // A guardian may appear under several students; surface them all.
        let mut stmt = conn.prepare(
            "SELECT id, nombre, estudiante_id FROM acudientes WHERE email = ? ORDER BY rowid",
        )?;
        let filas = stmt
            .query_map([email], |r| {
                let id: String = r.get(0)?;
                let nombre: String = r.get(1)?;
                let estudiante_id: String = r.get(2)?;
                Ok((id, nombre, estudiante_id))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let Some((id, nombre, _)) = filas.first().cloned() else {
            return Ok(None);
        };
        let estudiante_ids: Vec<String> =
            filas.into_iter().map(|(_, _, eid)| eid).collect();
        Ok(Some(json!({
            "id": id,
            "rol": "acudiente",
            "nombre": nombre,
            "estudianteIds": estudiante_ids
        })))
    }
}

fn cuentas_buscar(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let rol_raw = get_required_str(params, "rol")?;
    let email = get_required_str(params, "email")?;
    let rol =
        Rol::parse(&rol_raw).ok_or_else(|| bad_params("rol must be admin|profesor|acudiente"))?;

    let perfil = rol
        .repo()
        .buscar_por_email(conn, &email)
        .map_err(db_err)?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "cuenta no encontrada".to_string(),
            details: Some(json!({ "rol": rol_raw, "email": email })),
        })?;

    Ok(json!({ "cuenta": perfil }))
}

fn cuentas_crear_admin(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let nombre = get_required_str(params, "nombre")?;
    let email = get_required_str(params, "email")?;

    let cuenta_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO cuentas_admin(id, nombre, email) VALUES(?, ?, ?)",
        (&cuenta_id, &nombre, &email),
    )
    .map_err(|e| {
        if e.to_string().contains("UNIQUE") {
            HandlerErr {
                code: "conflict",
                message: "email ya registrado".to_string(),
                details: Some(json!({ "email": email })),
            }
        } else {
            HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "cuentas_admin" })),
            }
        }
    })?;

    Ok(json!({ "cuentaId": cuenta_id }))
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
        "cuentas.buscar" => Some(with_conn(state, req, cuentas_buscar)),
        "cuentas.crearAdmin" => Some(with_conn(state, req, cuentas_crear_admin)),
        _ => None,
    }
}
