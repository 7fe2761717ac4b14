pub mod catalogo;
pub mod core;
pub mod cuentas;
pub mod estudiantes;
pub mod horarios;
pub mod pagos;
