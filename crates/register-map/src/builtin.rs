//! Compiled-in register catalog for the Qube heat pump.
//!
//! The vendor publishes the same table as `modbus.yaml`; shipping it in code
//! keeps the daemon usable without a catalog file and lets the validator run
//! at compile-test time instead of on every start.

use crate::{CatalogError, DataType, Region, RegisterDef, RegisterMap};

use Region::{Coil, DiscreteInput, Holding, Input};

pub fn builtin() -> Result<RegisterMap, CatalogError> {
    let defs = vec![
        // Discrete inputs: status bits and alarms.
        RegisterDef::new("al_general", "Algemeen alarm", 0, DiscreteInput, DataType::Bool),
        RegisterDef::new(
            "four_way_valve",
            "Vierwegklep verwarmen/koelen",
            2,
            DiscreteInput,
            DataType::Bool,
        ),
        RegisterDef::new(
            "three_way_valve",
            "Driewegklep SWW/CV",
            4,
            DiscreteInput,
            DataType::Bool,
        ),
        RegisterDef::new(
            "compressor_running",
            "Compressor actief",
            6,
            DiscreteInput,
            DataType::Bool,
        ),
        RegisterDef::new("pump_running", "Circulatiepomp actief", 7, DiscreteInput, DataType::Bool),
        RegisterDef::new("al_flow", "Flow alarm", 10, DiscreteInput, DataType::Bool),
        // Coils: controls.
        RegisterDef::new("unit_on", "Unit aan/uit", 0, Coil, DataType::Bool).writable(),
        RegisterDef::new("dhw_boost", "SWW boost", 1, Coil, DataType::Bool).writable(),
        RegisterDef::new("silent_mode", "Stille modus", 2, Coil, DataType::Bool).writable(),
        RegisterDef::new("bms_sgready_a", "SG-ready ingang A", 3, Coil, DataType::Bool).writable(),
        RegisterDef::new("bms_sgready_b", "SG-ready ingang B", 4, Coil, DataType::Bool).writable(),
        // Input registers: measurements.
        RegisterDef::new("temp_supply", "Aanvoertemperatuur", 100, Input, DataType::Float32)
            .precision(1)
            .unit("°C"),
        RegisterDef::new("temp_return", "Retourtemperatuur", 102, Input, DataType::Float32)
            .precision(1)
            .unit("°C"),
        RegisterDef::new("temp_outdoor", "Buitentemperatuur", 104, Input, DataType::Float32)
            .precision(1)
            .unit("°C"),
        RegisterDef::new("temp_dhw", "Boilertemperatuur", 106, Input, DataType::Float32)
            .precision(1)
            .unit("°C"),
        RegisterDef::new("power_electric", "Elektrisch vermogen", 110, Input, DataType::Float32)
            .precision(0)
            .unit("W"),
        RegisterDef::new("power_thermic", "Thermisch vermogen", 112, Input, DataType::Float32)
            .precision(0)
            .unit("W"),
        RegisterDef::new("cop_calc", "COP berekend", 114, Input, DataType::Float32).precision(2),
        RegisterDef::new(
            "energy_electric_total",
            "Elektrisch verbruik totaal",
            120,
            Input,
            DataType::Uint32,
        )
        .scale(0.1)
        .precision(1)
        .unit("kWh")
        .cumulative(),
        RegisterDef::new(
            "energy_thermic_total",
            "Thermische opbrengst totaal",
            122,
            Input,
            DataType::Uint32,
        )
        .scale(0.1)
        .precision(1)
        .unit("kWh")
        .cumulative(),
        RegisterDef::new(
            "workinghours_compressor",
            "Bedrijfsuren compressor",
            124,
            Input,
            DataType::Uint32,
        )
        .unit("h")
        .cumulative(),
        RegisterDef::new(
            "workinghours_pump",
            "Bedrijfsuren circulatiepomp",
            126,
            Input,
            DataType::Uint32,
        )
        .unit("h")
        .cumulative(),
        RegisterDef::new("unit_status", "Status warmtepomp", 130, Input, DataType::Uint16),
        // Holding registers: setpoints.
        RegisterDef::new("setpoint_dhw", "Setpoint SWW", 200, Holding, DataType::Float32)
            .precision(1)
            .unit("°C")
            .writable(),
        RegisterDef::new(
            "setpoint_heating_offset",
            "Stooklijn verschuiving",
            202,
            Holding,
            DataType::Int16,
        )
        .scale(0.1)
        .precision(1)
        .unit("K")
        .writable(),
        RegisterDef::new("night_mode_level", "Nachtstand niveau", 203, Holding, DataType::Uint16)
            .writable(),
    ];

    RegisterMap::new(defs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_validates() {
        let map = builtin().expect("builtin catalog");
        assert!(map.len() >= 20);
        assert!(map.get("temp_supply").is_some());
        let hours = map.get("workinghours_compressor").expect("hours def");
        assert!(hours.cumulative);
        assert!(!hours.writable);
        let setpoint = map.get("setpoint_dhw").expect("setpoint def");
        assert!(setpoint.writable);
        assert_eq!(setpoint.region, Region::Holding);
    }
}
