use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// Типы самолетов, для которых есть схема салона в seats.json
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AircraftType {
    #[serde(rename = "ATR")]
    Atr,
    #[serde(rename = "Airbus 320")]
    Airbus320,
    #[serde(rename = "Boeing 737 Max")]
    Boeing737Max,
}

impl AircraftType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AircraftType::Atr => "ATR",
            AircraftType::Airbus320 => "Airbus 320",
            AircraftType::Boeing737Max => "Boeing 737 Max",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ATR" => Some(AircraftType::Atr),
            "Airbus 320" => Some(AircraftType::Airbus320),
            "Boeing 737 Max" => Some(AircraftType::Boeing737Max),
            _ => None,
        }
    }
}

impl std::fmt::Display for AircraftType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Статичная геометрия салона: диапазон рядов и буквы мест.
/// Загружается один раз на старте и дальше не меняется.
#[derive(Debug, Clone, Deserialize)]
pub struct AircraftLayout {
    #[serde(rename = "startRow")]
    pub start_row: u32,
    #[serde(rename = "endRow")]
    pub end_row: u32,
    pub seats: Vec<String>,
}

/// Назначение экипажа на рейс. Скалярные поля после создания не меняются,
/// заменяются только дочерние места.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightAssignment {
    pub id: i64,
    pub crew_name: String,
    pub crew_id: String,
    pub flight_number: String,
    pub flight_date: String, // DD-MM-YY
    pub aircraft_type: AircraftType,
    pub seat_assignments: Vec<FlightSeatAssignment>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightSeatAssignment {
    pub id: i64,
    pub flight_assignment_id: i64,
    pub seat: String, // формат "<ряд><буква>", например "14D"
    pub created_at: NaiveDateTime,
}

/// Собирает коды мест из строк назначения.
pub fn extract_seats(assignments: &[FlightSeatAssignment]) -> Vec<String> {
    assignments.iter().map(|a| a.seat.clone()).collect()
}
