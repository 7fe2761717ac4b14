//! Payment ledger: pagos and their abonos (installments).
//!
//! Every mutation that touches both tables runs inside one transaction so a
//! partially applied abono can never leave `monto_pagado + saldo_pendiente`
//! out of step with `monto`.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, AbonoRechazo, EstadoPago};
use chrono::{NaiveDate, Utc};
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

fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

fn get_required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| bad_params(format!("{} must be YYYY-MM-DD", key)))?;
    Ok(raw)
}

#[derive(Debug, Clone)]
struct PagoRow {
    id: String,
    estudiante_id: String,
    numero_recibo: String,
    concepto: String,
    monto: f64,
    monto_pagado: f64,
    saldo_pendiente: f64,
    estado: String,
    fecha_vencimiento: String,
    fecha_pago: Option<String>,
    metodo_pago: Option<String>,
    anio: i64,
}

fn pago_to_json(p: &PagoRow) -> serde_json::Value {
    json!({
        "id": p.id,
        "estudianteId": p.estudiante_id,
        "numeroRecibo": p.numero_recibo,
        "concepto": p.concepto,
        "monto": p.monto,
        "montoPagado": p.monto_pagado,
        "saldoPendiente": p.saldo_pendiente,
        "estado": p.estado,
        "fechaVencimiento": p.fecha_vencimiento,
        "fechaPago": p.fecha_pago,
        "metodoPago": p.metodo_pago,
        "anio": p.anio
    })
}

fn row_to_pago(r: &rusqlite::Row<'_>) -> rusqlite::Result<PagoRow> {
    Ok(PagoRow {
        id: r.get(0)?,
        estudiante_id: r.get(1)?,
        numero_recibo: r.get(2)?,
        concepto: r.get(3)?,
        monto: r.get(4)?,
        monto_pagado: r.get(5)?,
        saldo_pendiente: r.get(6)?,
        estado: r.get(7)?,
        fecha_vencimiento: r.get(8)?,
        fecha_pago: r.get(9)?,
        metodo_pago: r.get(10)?,
        anio: r.get(11)?,
    })
}

const PAGO_COLUMNS: &str = "id, estudiante_id, numero_recibo, concepto, monto, monto_pagado,
     saldo_pendiente, estado, fecha_vencimiento, fecha_pago, metodo_pago, anio";

fn load_pago(conn: &Connection, pago_id: &str) -> Result<PagoRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM pagos WHERE id = ?", PAGO_COLUMNS),
        [pago_id],
        row_to_pago,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "pago no encontrado".to_string(),
        details: Some(json!({ "pagoId": pago_id })),
    })
}

fn estudiante_exists(conn: &Connection, estudiante_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM estudiantes WHERE id = ?",
        [estudiante_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn pagos_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let estudiante_id = get_required_str(params, "estudiante_id")?;
    let numero_recibo = get_required_str(params, "numero_recibo")?;
    let concepto = get_required_str(params, "concepto")?;
    let monto = get_required_f64(params, "monto")?;
    if monto <= 0.0 {
        return Err(bad_params("monto must be positive"));
    }
    let fecha_vencimiento = get_required_date(params, "fecha_vencimiento")?;
    let anio = params
        .get("anio")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params("missing anio"))?;

    if !estudiante_exists(conn, &estudiante_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "estudiante no encontrado".to_string(),
            details: Some(json!({ "estudianteId": estudiante_id })),
        });
    }

    // A charge may be created with an opening balance already paid
    // (e.g. migrated from a paper receipt book).
    let monto_pagado = match params.get("monto_pagado") {
        None => 0.0,
        Some(v) => {
            let mp = v
                .as_f64()
                .ok_or_else(|| bad_params("monto_pagado must be numeric"))?;
            if mp < 0.0 || mp > monto {
                return Err(bad_params("monto_pagado must be between 0 and monto"));
            }
            mp
        }
    };
    let estado = ledger::derivar_estado(monto, monto_pagado);
    let saldo_pendiente = match estado {
        EstadoPago::Pagado => 0.0,
        _ => monto - monto_pagado,
    };

    let pago = PagoRow {
        id: Uuid::new_v4().to_string(),
        estudiante_id,
        numero_recibo,
        concepto,
        monto,
        monto_pagado,
        saldo_pendiente,
        estado: estado.as_str().to_string(),
        fecha_vencimiento,
        fecha_pago: None,
        metodo_pago: None,
        anio,
    };

    conn.execute(
        "INSERT INTO pagos(id, estudiante_id, numero_recibo, concepto, monto, monto_pagado,
            saldo_pendiente, estado, fecha_vencimiento, fecha_pago, metodo_pago, anio, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)",
        (
            &pago.id,
            &pago.estudiante_id,
            &pago.numero_recibo,
            &pago.concepto,
            pago.monto,
            pago.monto_pagado,
            pago.saldo_pendiente,
            &pago.estado,
            &pago.fecha_vencimiento,
            pago.anio,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "pagos" })),
    })?;

    Ok(pago_to_json(&pago))
}

fn pagos_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let pago_id = get_required_str(params, "pago_id")?;
    let pago = load_pago(conn, &pago_id)?;
    Ok(pago_to_json(&pago))
}

fn pagos_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = format!(
        "SELECT {} FROM pagos WHERE 1=1",
        PAGO_COLUMNS
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(estudiante_id) = params.get("estudiante_id").and_then(|v| v.as_str()) {
        sql.push_str(" AND estudiante_id = ?");
        binds.push(Value::Text(estudiante_id.to_string()));
    }
    if let Some(estado) = params.get("estado").and_then(|v| v.as_str()) {
        if EstadoPago::parse(estado).is_none() {
            return Err(bad_params("estado must be pendiente|parcial|pagado|vencido"));
        }
        sql.push_str(" AND estado = ?");
        binds.push(Value::Text(estado.to_string()));
    }
    sql.push_str(" ORDER BY fecha_vencimiento, numero_recibo");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let pagos = stmt
        .query_map(params_from_iter(binds), row_to_pago)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({
        "pagos": pagos.iter().map(pago_to_json).collect::<Vec<_>>()
    }))
}

fn registrar_abono(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let pago_id = get_required_str(params, "pago_id")?;
    let monto_abono = get_required_f64(params, "monto")?;
    let metodo_pago = params
        .get("metodo_pago")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let recibo_numero = params
        .get("recibo_numero")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let observaciones = params
        .get("observaciones")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    // Read-sum, insert and update must observe one consistent snapshot.
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let pago = load_pago(&tx, &pago_id)?;
    if pago.estado == EstadoPago::Pagado.as_str() {
        return Err(HandlerErr {
            code: "conflict",
            message: "el pago ya esta liquidado".to_string(),
            details: Some(json!({ "pagoId": pago_id })),
        });
    }

    let total_abonado_previo: f64 = tx
        .query_row(
            "SELECT COALESCE(SUM(monto), 0) FROM abonos WHERE pago_id = ?",
            [&pago_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    // Full settlements bypass abono history, so the row total can run ahead
    // of the abono sum. Apply against whichever is larger.
    let pagado_previo = total_abonado_previo.max(pago.monto_pagado);

    let aplicacion = ledger::aplicar_abono(pago.monto, pagado_previo, monto_abono).map_err(
        |rechazo| match rechazo {
            AbonoRechazo::MontoNoPositivo => bad_params("monto must be positive"),
            AbonoRechazo::PagoYaLiquidado => HandlerErr {
                code: "conflict",
                message: "el pago ya esta liquidado".to_string(),
                details: Some(json!({ "pagoId": pago_id })),
            },
        },
    )?;

    let abono_id = Uuid::new_v4().to_string();
    let fecha = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO abonos(id, pago_id, monto, fecha, metodo_pago, recibo_numero, observaciones)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &abono_id,
            &pago_id,
            aplicacion.aplicado,
            &fecha,
            &metodo_pago,
            &recibo_numero,
            &observaciones,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "abonos" })),
    })?;

    let fecha_pago = match aplicacion.estado {
        EstadoPago::Pagado => Some(fecha.clone()),
        _ => None,
    };
    tx.execute(
        "UPDATE pagos SET estado = ?, monto_pagado = ?, saldo_pendiente = ?,
            fecha_pago = COALESCE(fecha_pago, ?)
         WHERE id = ?",
        (
            aplicacion.estado.as_str(),
            aplicacion.nuevo_pagado,
            aplicacion.saldo_pendiente,
            &fecha_pago,
            &pago_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "pagos" })),
    })?;

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "abonoId": abono_id,
        "montoAplicado": aplicacion.aplicado,
        "total_abonado": aplicacion.nuevo_pagado,
        "saldo_pendiente": aplicacion.saldo_pendiente,
        "estado": aplicacion.estado.as_str()
    }))
}

fn registrar_pago(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let pago_id = get_required_str(params, "pago_id")?;
    let metodo_pago = get_required_str(params, "metodo_pago")?;
    let fecha_pago = match params.get("fecha_pago").and_then(|v| v.as_str()) {
        Some(_) => get_required_date(params, "fecha_pago")?,
        None => Utc::now().date_naive().format("%Y-%m-%d").to_string(),
    };

    let pago = load_pago(conn, &pago_id)?;

    // Direct override: the full amount is settled regardless of any prior
    // partials and no abono row is written. Safe to repeat.
    conn.execute(
        "UPDATE pagos SET estado = 'pagado', monto_pagado = monto, saldo_pendiente = 0,
            fecha_pago = ?, metodo_pago = ?
         WHERE id = ?",
        (&fecha_pago, &metodo_pago, &pago_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "pagos" })),
    })?;

    Ok(json!({
        "pagoId": pago_id,
        "estado": "pagado",
        "montoPagado": pago.monto,
        "saldoPendiente": 0.0,
        "fechaPago": fecha_pago
    }))
}

fn pagos_abonos(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let pago_id = get_required_str(params, "pago_id")?;
    let _ = load_pago(conn, &pago_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, monto, fecha, metodo_pago, recibo_numero, observaciones
             FROM abonos
             WHERE pago_id = ?
             ORDER BY fecha, rowid",
        )
        .map_err(db_err)?;
    let abonos = stmt
        .query_map([&pago_id], |r| {
            let id: String = r.get(0)?;
            let monto: f64 = r.get(1)?;
            let fecha: String = r.get(2)?;
            let metodo_pago: Option<String> = r.get(3)?;
            let recibo_numero: Option<String> = r.get(4)?;
            let observaciones: Option<String> = r.get(5)?;
            Ok(json!({
                "id": id,
                "monto": monto,
                "fecha": fecha,
                "metodoPago": metodo_pago,
                "reciboNumero": recibo_numero,
                "observaciones": observaciones
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "pagoId": pago_id, "abonos": abonos }))
}

fn marcar_vencidos(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    // Invoked by an external scheduler; the ledger itself never flips a
    // payment to vencido.
    let hoy = match params.get("hoy").and_then(|v| v.as_str()) {
        Some(_) => get_required_date(params, "hoy")?,
        None => Utc::now().date_naive().format("%Y-%m-%d").to_string(),
    };

    let cambiados = conn
        .execute(
            "UPDATE pagos SET estado = 'vencido'
             WHERE estado IN ('pendiente', 'parcial') AND fecha_vencimiento < ?",
            [&hoy],
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "pagos" })),
        })?;

    Ok(json!({ "vencidos": cambiados }))
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
        "pagos.create" => Some(with_conn(state, req, pagos_create)),
        "pagos.get" => Some(with_conn(state, req, pagos_get)),
        "pagos.list" => Some(with_conn(state, req, pagos_list)),
        "pagos.registrarAbono" => Some(with_conn(state, req, registrar_abono)),
        "pagos.registrarPago" => Some(with_conn(state, req, registrar_pago)),
        "pagos.abonos" => Some(with_conn(state, req, pagos_abonos)),
        "pagos.marcarVencidos" => Some(with_conn(state, req, marcar_vencidos)),
        _ => None,
    }
}
