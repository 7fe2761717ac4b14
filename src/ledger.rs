/// Tolerance for non-integral peso amounts coming back from REAL columns.
pub const EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstadoPago {
    Pendiente,
    Parcial,
    Pagado,
    Vencido,
}

impl EstadoPago {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstadoPago::Pendiente => "pendiente",
            EstadoPago::Parcial => "parcial",
            EstadoPago::Pagado => "pagado",
            EstadoPago::Vencido => "vencido",
        }
    }

    pub fn parse(s: &str) -> Option<EstadoPago> {
        match s {
            "pendiente" => Some(EstadoPago::Pendiente),
            "parcial" => Some(EstadoPago::Parcial),
            "pagado" => Some(EstadoPago::Pagado),
            "vencido" => Some(EstadoPago::Vencido),
            _ => None,
        }
    }
}

/// Estado derived purely from the amounts. `vencido` is never produced here;
/// the due-date sweep assigns it separately and any abono re-derives from
/// the amounts again.
pub fn derivar_estado(monto: f64, monto_pagado: f64) -> EstadoPago {
    if monto_pagado + EPS >= monto {
        EstadoPago::Pagado
    } else if monto_pagado > EPS {
        EstadoPago::Parcial
    } else {
        EstadoPago::Pendiente
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aplicacion {
    /// Amount actually applied, after clamping to the remaining balance.
    pub aplicado: f64,
    pub nuevo_pagado: f64,
    pub saldo_pendiente: f64,
    pub estado: EstadoPago,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbonoRechazo {
    MontoNoPositivo,
    PagoYaLiquidado,
}

/// Apply one abono against a payment. Overshoot is clamped: only the
/// remaining balance is applied and recorded, so
/// `nuevo_pagado + saldo_pendiente == monto` holds exactly and
/// `nuevo_pagado` never decreases.
pub fn aplicar_abono(
    monto: f64,
    pagado_previo: f64,
    abono: f64,
) -> Result<Aplicacion, AbonoRechazo> {
    if abono <= 0.0 {
        return Err(AbonoRechazo::MontoNoPositivo);
    }
    let saldo_previo = monto - pagado_previo;
    if saldo_previo <= EPS {
        return Err(AbonoRechazo::PagoYaLiquidado);
    }

    let aplicado = if abono > saldo_previo {
        saldo_previo
    } else {
        abono
    };
    let nuevo_pagado = pagado_previo + aplicado;
    let estado = derivar_estado(monto, nuevo_pagado);
    let saldo_pendiente = match estado {
        EstadoPago::Pagado => 0.0,
        _ => monto - nuevo_pagado,
    };

    Ok(Aplicacion {
        aplicado,
        nuevo_pagado,
        saldo_pendiente,
        estado,
    })
}
