use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_escuelad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn escuelad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Plantel {
    grupo_a: String,
    grupo_b: String,
    profesor: String,
    materia: String,
}

fn setup_plantel(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Plantel {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let grupo_a = request_ok(
        stdin,
        reader,
        "ga",
        "grupos.create",
        json!({ "nombre": "6A", "grado": "Sexto" }),
    )
    .get("grupoId")
    .and_then(|v| v.as_str())
    .expect("grupoId")
    .to_string();
    let grupo_b = request_ok(
        stdin,
        reader,
        "gb",
        "grupos.create",
        json!({ "nombre": "6B", "grado": "Sexto" }),
    )
    .get("grupoId")
    .and_then(|v| v.as_str())
    .expect("grupoId")
    .to_string();
    let profesor = request_ok(
        stdin,
        reader,
        "pr",
        "profesores.create",
        json!({ "nombre": "Laura", "apellido": "Mejia" }),
    )
    .get("profesorId")
    .and_then(|v| v.as_str())
    .expect("profesorId")
    .to_string();
    let materia = request_ok(
        stdin,
        reader,
        "ma",
        "materias.create",
        json!({ "nombre": "Matematicas" }),
    )
    .get("materiaId")
    .and_then(|v| v.as_str())
    .expect("materiaId")
    .to_string();

    Plantel {
        grupo_a,
        grupo_b,
        profesor,
        materia,
    }
}

fn bloque_params(p: &Plantel, grupo: &str, dia: &str, inicio: &str, fin: &str) -> serde_json::Value {
    json!({
        "grupo_id": grupo,
        "profesor_id": p.profesor,
        "materia_id": p.materia,
        "dia_semana": dia,
        "hora_inicio": inicio,
        "hora_fin": fin,
        "aula": "201"
    })
}

fn expect_conflict(value: serde_json::Value, scope: &str) {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    let error = value.get("error").expect("error object");
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("conflict"));
    assert_eq!(
        error
            .get("details")
            .and_then(|d| d.get("scope"))
            .and_then(|v| v.as_str()),
        Some(scope)
    );
}

#[test]
fn overlapping_block_for_same_group_is_rejected() {
    let workspace = temp_dir("escuelad-horarios-grupo");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let p = setup_plantel(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Lunes", "09:00", "10:00"),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "h2",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Lunes", "09:30", "10:30"),
    );
    expect_conflict(resp, "grupo");

    // Touching boundary is not an overlap.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h3",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Lunes", "10:00", "11:00"),
    );

    // Same times on another weekday are fine too.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h4",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Martes", "09:30", "10:30"),
    );
}

#[test]
fn teacher_scope_conflicts_fire_across_groups() {
    let workspace = temp_dir("escuelad-horarios-profesor");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let p = setup_plantel(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Miercoles", "08:00", "09:00"),
    );

    // Different group, same teacher, overlapping interval.
    let resp = request(
        &mut stdin,
        &mut reader,
        "h2",
        "horarios.create",
        bloque_params(&p, &p.grupo_b, "Miercoles", "08:30", "09:30"),
    );
    expect_conflict(resp, "profesor");

    // A different teacher in grupo_b at that time is fine.
    let otro_profesor = request_ok(
        &mut stdin,
        &mut reader,
        "pr2",
        "profesores.create",
        json!({ "nombre": "Carlos", "apellido": "Ruiz" }),
    )
    .get("profesorId")
    .and_then(|v| v.as_str())
    .expect("profesorId")
    .to_string();
    let mut params = bloque_params(&p, &p.grupo_b, "Miercoles", "08:30", "09:30");
    params["profesor_id"] = json!(otro_profesor);
    let _ = request_ok(&mut stdin, &mut reader, "h3", "horarios.create", params);
}

#[test]
fn update_excludes_the_edited_block_from_the_check() {
    let workspace = temp_dir("escuelad-horarios-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let p = setup_plantel(&mut stdin, &mut reader, &workspace);

    let horario_id = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Jueves", "09:00", "10:00"),
    )
    .get("horarioId")
    .and_then(|v| v.as_str())
    .expect("horarioId")
    .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h2",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Jueves", "11:00", "12:00"),
    );

    // Re-saving the block over its own unchanged slot must not self-conflict.
    let mut params = bloque_params(&p, &p.grupo_a, "Jueves", "09:00", "10:00");
    params["horario_id"] = json!(horario_id);
    let _ = request_ok(&mut stdin, &mut reader, "u1", "horarios.update", params);

    // Moving it onto the other block still conflicts.
    let mut params = bloque_params(&p, &p.grupo_a, "Jueves", "11:30", "12:30");
    params["horario_id"] = json!(horario_id);
    let resp = request(&mut stdin, &mut reader, "u2", "horarios.update", params);
    expect_conflict(resp, "grupo");
}

#[test]
fn validation_rejects_bad_day_and_inverted_interval() {
    let workspace = temp_dir("escuelad-horarios-validate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let p = setup_plantel(&mut stdin, &mut reader, &workspace);

    for (id, params) in [
        (
            "bad-day",
            bloque_params(&p, &p.grupo_a, "Domingo", "09:00", "10:00"),
        ),
        (
            "inverted",
            bloque_params(&p, &p.grupo_a, "Lunes", "10:00", "09:00"),
        ),
        (
            "empty",
            bloque_params(&p, &p.grupo_a, "Lunes", "09:00", "09:00"),
        ),
        (
            "bad-hour",
            bloque_params(&p, &p.grupo_a, "Lunes", "9:00", "10:00"),
        ),
    ] {
        let resp = request(&mut stdin, &mut reader, id, "horarios.create", params);
        assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", id);
        assert_eq!(
            resp.get("error")
                .and_then(|e| e.get("code"))
                .and_then(|v| v.as_str()),
            Some("bad_params"),
            "{}",
            id
        );
    }
}

#[test]
fn delete_frees_the_slot() {
    let workspace = temp_dir("escuelad-horarios-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let p = setup_plantel(&mut stdin, &mut reader, &workspace);

    let horario_id = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Viernes", "09:00", "10:00"),
    )
    .get("horarioId")
    .and_then(|v| v.as_str())
    .expect("horarioId")
    .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "horarios.delete",
        json!({ "horario_id": horario_id }),
    );

    // The freed interval is admissible again.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "h2",
        "horarios.create",
        bloque_params(&p, &p.grupo_a, "Viernes", "09:00", "10:00"),
    );

    let listado = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "horarios.list",
        json!({ "grupo_id": p.grupo_a }),
    );
    let horarios = listado.get("horarios").and_then(|v| v.as_array()).unwrap();
    assert_eq!(horarios.len(), 1);
    assert_eq!(
        horarios[0].get("materiaNombre").and_then(|v| v.as_str()),
        Some("Matematicas")
    );
}
