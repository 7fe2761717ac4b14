use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("escuela.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grupos(
            id TEXT PRIMARY KEY,
            nombre TEXT NOT NULL,
            grado TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS materias(
            id TEXT PRIMARY KEY,
            nombre TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS estudiantes(
            id TEXT PRIMARY KEY,
            nombre TEXT NOT NULL,
            apellido TEXT NOT NULL,
            documento TEXT,
            grupo_id TEXT,
            ciclo TEXT NOT NULL DEFAULT 'activo',
            fecha_ingreso TEXT,
            updated_at TEXT,
            FOREIGN KEY(grupo_id) REFERENCES grupos(id)
        )",
        [],
    )?;
    ensure_estudiantes_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_estudiantes_grupo ON estudiantes(grupo_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_estudiantes_ciclo ON estudiantes(ciclo)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS acudientes(
            id TEXT PRIMARY KEY,
            estudiante_id TEXT NOT NULL,
            nombre TEXT NOT NULL,
            parentesco TEXT,
            telefono TEXT,
            email TEXT,
            FOREIGN KEY(estudiante_id) REFERENCES estudiantes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_acudientes_estudiante ON acudientes(estudiante_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profesores(
            id TEXT PRIMARY KEY,
            nombre TEXT NOT NULL,
            apellido TEXT NOT NULL,
            email TEXT UNIQUE,
            ciclo TEXT NOT NULL DEFAULT 'activo'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pagos(
            id TEXT PRIMARY KEY,
            estudiante_id TEXT NOT NULL,
            numero_recibo TEXT NOT NULL,
            concepto TEXT NOT NULL,
            monto REAL NOT NULL,
            monto_pagado REAL NOT NULL DEFAULT 0,
            saldo_pendiente REAL NOT NULL,
            estado TEXT NOT NULL DEFAULT 'pendiente',
            fecha_vencimiento TEXT NOT NULL,
            fecha_pago TEXT,
            metodo_pago TEXT,
            anio INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(estudiante_id) REFERENCES estudiantes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pagos_estudiante ON pagos(estudiante_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pagos_estado ON pagos(estado)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pagos_vencimiento ON pagos(fecha_vencimiento)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS abonos(
            id TEXT PRIMARY KEY,
            pago_id TEXT NOT NULL,
            monto REAL NOT NULL,
            fecha TEXT NOT NULL,
            metodo_pago TEXT,
            recibo_numero TEXT,
            observaciones TEXT,
            FOREIGN KEY(pago_id) REFERENCES pagos(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_abonos_pago ON abonos(pago_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS horarios(
            id TEXT PRIMARY KEY,
            grupo_id TEXT NOT NULL,
            profesor_id TEXT NOT NULL,
            materia_id TEXT NOT NULL,
            dia_semana TEXT NOT NULL,
            hora_inicio TEXT NOT NULL,
            hora_fin TEXT NOT NULL,
            aula TEXT,
            FOREIGN KEY(grupo_id) REFERENCES grupos(id),
            FOREIGN KEY(profesor_id) REFERENCES profesores(id),
            FOREIGN KEY(materia_id) REFERENCES materias(id)
        )",
        [],
    )?;
    ensure_horarios_aula(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_horarios_grupo_dia ON horarios(grupo_id, dia_semana)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_horarios_profesor_dia ON horarios(profesor_id, dia_semana)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cuentas_admin(
            id TEXT PRIMARY KEY,
            nombre TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_estudiantes_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "estudiantes", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE estudiantes ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_horarios_aula(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces were created before the aula column existed.
    if table_has_column(conn, "horarios", "aula")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE horarios ADD COLUMN aula TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
