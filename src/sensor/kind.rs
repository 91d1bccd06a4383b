use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Dht22,
    Mq4,
    Mq7,
}

/// The field group of the shared snapshot a sensor writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorGroup {
    Climate,
    Methane,
    CarbonMonoxide,
}

/// Physical quantity carried by one of the two channels of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Humidity,
    Voltage,
    Concentration,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [SensorKind::Dht22, SensorKind::Mq4, SensorKind::Mq7];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Dht22 => "DHT22",
            SensorKind::Mq4 => "MQ-4",
            SensorKind::Mq7 => "MQ-7",
        }
    }

    pub fn group(&self) -> SensorGroup {
        match self {
            SensorKind::Dht22 => SensorGroup::Climate,
            SensorKind::Mq4 => SensorGroup::Methane,
            SensorKind::Mq7 => SensorGroup::CarbonMonoxide,
        }
    }

    /// Quantities in the order a sample carries them.
    pub fn quantities(&self) -> [Quantity; 2] {
        match self {
            SensorKind::Dht22 => [Quantity::Temperature, Quantity::Humidity],
            SensorKind::Mq4 | SensorKind::Mq7 => [Quantity::Voltage, Quantity::Concentration],
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dht22" => Ok(SensorKind::Dht22),
            "mq-4" | "mq4" => Ok(SensorKind::Mq4),
            "mq-7" | "mq7" => Ok(SensorKind::Mq7),
            _ => Err(Error::Config(format!("unknown sensor kind: {s}"))),
        }
    }
}

impl Quantity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantity::Temperature => "temperature",
            Quantity::Humidity => "humidity",
            Quantity::Voltage => "voltage",
            Quantity::Concentration => "concentration",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
