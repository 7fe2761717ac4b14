/// Weekly schedule blocks and the overlap predicate behind the
/// horarios conflict check.

pub const DIAS_HABILES: [&str; 5] = ["Lunes", "Martes", "Miercoles", "Jueves", "Viernes"];

pub fn es_dia_habil(dia: &str) -> bool {
    DIAS_HABILES.contains(&dia)
}

/// Parse a zero-padded "HH:MM" clock time into minutes since midnight.
pub fn parse_hora(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bloque {
    pub id: String,
    pub dia_semana: String,
    /// Minutes since midnight, half-open interval [inicio, fin).
    pub inicio: u32,
    pub fin: u32,
}

/// Half-open interval overlap: [a_inicio, a_fin) and [b_inicio, b_fin)
/// clash iff a_inicio < b_fin && b_inicio < a_fin. Touching boundaries
/// (fin == inicio) do not clash.
pub fn se_solapan(a_inicio: u32, a_fin: u32, b_inicio: u32, b_fin: u32) -> bool {
    a_inicio < b_fin && b_inicio < a_fin
}

/// First block among `bloques` that clashes with the candidate interval on
/// the same weekday. `excluir_id` skips the row being edited so an update
/// never conflicts with itself.
pub fn buscar_conflicto<'a>(
    bloques: &'a [Bloque],
    dia_semana: &str,
    inicio: u32,
    fin: u32,
    excluir_id: Option<&str>,
) -> Option<&'a Bloque> {
    bloques.iter().find(|b| {
        if excluir_id == Some(b.id.as_str()) {
            return false;
        }
        b.dia_semana == dia_semana && se_solapan(inicio, fin, b.inicio, b.fin)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bloque(id: &str, dia: &str, inicio: &str, fin: &str) -> Bloque {
        Bloque {
            id: id.to_string(),
            dia_semana: dia.to_string(),
            inicio: parse_hora(inicio).expect("inicio"),
            fin: parse_hora(fin).expect("fin"),
        }
    }

    #[test]
    fn parse_hora_accepts_padded_clock_times() {
        assert_eq!(parse_hora("00:00"), Some(0));
        assert_eq!(parse_hora("09:30"), Some(570));
        assert_eq!(parse_hora("23:59"), Some(1439));
        assert_eq!(parse_hora("24:00"), None);
        assert_eq!(parse_hora("9:30"), None);
        assert_eq!(parse_hora("09:60"), None);
        assert_eq!(parse_hora("0930"), None);
    }

    #[test]
    fn overlapping_blocks_clash() {
        let existentes = vec![bloque("a", "Lunes", "09:00", "10:00")];
        let hit = buscar_conflicto(&existentes, "Lunes", 570, 630, None);
        assert_eq!(hit.map(|b| b.id.as_str()), Some("a"));
    }

    #[test]
    fn touching_boundaries_do_not_clash() {
        let existentes = vec![bloque("a", "Lunes", "09:00", "10:00")];
        assert!(buscar_conflicto(&existentes, "Lunes", 600, 660, None).is_none());
        assert!(buscar_conflicto(&existentes, "Lunes", 480, 540, None).is_none());
    }

    #[test]
    fn different_day_never_clashes() {
        let existentes = vec![bloque("a", "Lunes", "09:00", "10:00")];
        assert!(buscar_conflicto(&existentes, "Martes", 540, 600, None).is_none());
    }

    #[test]
    fn containment_clashes_both_ways() {
        let existentes = vec![bloque("a", "Viernes", "08:00", "12:00")];
        assert!(buscar_conflicto(&existentes, "Viernes", 540, 600, None).is_some());
        let existentes = vec![bloque("a", "Viernes", "09:00", "09:30")];
        assert!(buscar_conflicto(&existentes, "Viernes", 480, 720, None).is_some());
    }

    #[test]
    fn excluir_id_skips_the_edited_row() {
        let existentes = vec![
            bloque("a", "Lunes", "09:00", "10:00"),
            bloque("b", "Lunes", "11:00", "12:00"),
        ];
        // Re-saving "a" over its own slot is fine.
        assert!(buscar_conflicto(&existentes, "Lunes", 540, 600, Some("a")).is_none());
        // But moving "b" onto "a" still clashes.
        let hit = buscar_conflicto(&existentes, "Lunes", 540, 600, Some("b"));
        assert_eq!(hit.map(|b| b.id.as_str()), Some("a"));
    }
}
