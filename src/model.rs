use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// Unit attached to a memory quantity.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
#[serde(rename_all = "lowercase")]
pub enum MemoryUnit {
    Bit,
    Byte,
    Kilobyte,
    Megabyte,
    Gigabyte,
    Terabyte,
}

impl MemoryUnit {
    /// Left shift that turns one unit into bits (1 KB = 2^10 bytes = 2^13 bits).
    pub fn bit_shift(&self) -> u32 {
        match self {
            MemoryUnit::Bit => 0,
            MemoryUnit::Byte => 3,
            MemoryUnit::Kilobyte => 13,
            MemoryUnit::Megabyte => 23,
            MemoryUnit::Gigabyte => 33,
            MemoryUnit::Terabyte => 43,
        }
    }
}

/// A (value, unit) pair. Compared by normalizing to bits.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Memory {
    pub value: u64,
    pub unit: MemoryUnit,
}

impl Memory {
    pub fn new(value: u64, unit: MemoryUnit) -> Self {
        Self { value, unit }
    }

    pub fn gigabytes(value: u64) -> Self {
        Self::new(value, MemoryUnit::Gigabyte)
    }

    /// Size in bits, saturating at `u64::MAX`.
    pub fn to_bits(&self) -> u64 {
        self.value.saturating_mul(1u64 << self.unit.bit_shift())
    }
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Cpu {
    pub brand: String,
    pub name: String,
    pub number_cores: u32,
    pub number_threads: u32,
    pub min_ghz: f64,
    pub max_ghz: f64,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Gpu {
    pub brand: String,
    pub name: String,
    pub min_ghz: f64,
    pub max_ghz: f64,
    pub memory: Memory,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    Hdd,
    Ssd,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Storage {
    pub driver: StorageDriver,
    pub memory: Memory,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
#[serde(rename_all = "lowercase")]
pub enum Panel {
    Ips,
    Oled,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Screen {
    pub size_inch: f32,
    pub resolution: Resolution,
    pub panel: Panel,
    pub multitouch: bool,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyboardLayout {
    Qwerty,
    Qwertz,
    Azerty,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Keyboard {
    pub layout: KeyboardLayout,
    pub backlit: bool,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    Kg(f64),
    Lb(f64),
}

/// One catalog entry.
///
/// Stores hand out clones, never references, so a caller mutating its copy
/// cannot reach the stored state.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Laptop {
    /// UUID string. Empty on create means "assign one".
    #[serde(default)]
    pub id: String,
    pub brand: String,
    pub name: String,
    pub cpu: Cpu,
    pub ram: Memory,
    pub gpus: Vec<Gpu>,
    pub storages: Vec<Storage>,
    pub screen: Screen,
    pub keyboard: Keyboard,
    pub weight: Weight,
    pub price_usd: f64,
    pub release_year: u32,
    /// Unix timestamp (seconds)
    pub updated_at: u64,
}

/// Conjunctive threshold predicate over a laptop.
///
/// Zero thresholds pass trivially; `max_price_usd == 0` means no price cap.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Filter {
    #[serde(default)]
    pub max_price_usd: f64,
    #[serde(default)]
    pub min_cpu_cores: u32,
    #[serde(default)]
    pub min_cpu_ghz: f64,
    #[serde(default)]
    pub min_ram: Option<Memory>,
}

impl Filter {
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_price_usd.is_finite() || self.max_price_usd < 0.0 {
            return Err(format!("max_price_usd must be a non-negative number, got {}", self.max_price_usd));
        }
        if !self.min_cpu_ghz.is_finite() || self.min_cpu_ghz < 0.0 {
            return Err(format!("min_cpu_ghz must be a non-negative number, got {}", self.min_cpu_ghz));
        }
        Ok(())
    }

    pub fn matches(&self, laptop: &Laptop) -> bool {
        if self.max_price_usd > 0.0 && laptop.price_usd > self.max_price_usd {
            return false;
        }
        if laptop.cpu.number_cores < self.min_cpu_cores {
            return false;
        }
        if laptop.cpu.min_ghz < self.min_cpu_ghz {
            return false;
        }
        if let Some(min_ram) = &self.min_ram {
            if laptop.ram.to_bits() < min_ram.to_bits() {
                return false;
            }
        }
        true
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Unknown,
    Jpg,
    Png,
}

impl ImageType {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageType::Unknown => "bin",
            ImageType::Jpg => "jpg",
            ImageType::Png => "png",
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => ImageType::Jpg,
            "png" => ImageType::Png,
            _ => ImageType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample;

    #[test]
    fn memory_units_normalize_to_bits() {
        assert_eq!(Memory::new(1, MemoryUnit::Gigabyte).to_bits(), 1 << 33);
        assert_eq!(Memory::new(1, MemoryUnit::Terabyte).to_bits(), 1 << 43);
        assert_eq!(Memory::new(12345, MemoryUnit::Bit).to_bits(), 12345);
        assert_eq!(Memory::new(2, MemoryUnit::Byte).to_bits(), 16);
        assert_eq!(Memory::new(1, MemoryUnit::Kilobyte).to_bits(), 8 * 1024);
        assert_eq!(Memory::new(u64::MAX, MemoryUnit::Terabyte).to_bits(), u64::MAX);
    }

    #[test]
    fn memory_compares_across_units() {
        let a = Memory::new(16, MemoryUnit::Gigabyte);
        let b = Memory::new(16 * 1024, MemoryUnit::Megabyte);
        assert_eq!(a.to_bits(), b.to_bits());
        assert!(Memory::new(1, MemoryUnit::Terabyte).to_bits() > a.to_bits());
    }

    fn laptop(price: f64, cores: u32, ghz: f64, ram_gb: u64) -> Laptop {
        let mut laptop = sample::new_laptop();
        laptop.price_usd = price;
        laptop.cpu.number_cores = cores;
        laptop.cpu.min_ghz = ghz;
        laptop.ram = Memory::gigabytes(ram_gb);
        laptop
    }

    #[test]
    fn filter_requires_every_threshold() {
        let filter = Filter {
            max_price_usd: 2000.0,
            min_cpu_cores: 4,
            min_cpu_ghz: 2.2,
            min_ram: Some(Memory::gigabytes(16)),
        };

        assert!(filter.matches(&laptop(1999.0, 4, 2.5, 16)));
        assert!(filter.matches(&laptop(2000.0, 4, 2.2, 16)));
        assert!(!filter.matches(&laptop(2200.0, 4, 2.5, 16)));
        assert!(!filter.matches(&laptop(1999.0, 2, 2.5, 16)));
        assert!(!filter.matches(&laptop(1999.0, 4, 2.0, 16)));
        assert!(!filter.matches(&laptop(1999.0, 4, 2.5, 8)));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::default();
        assert!(filter.matches(&laptop(99999.0, 1, 0.5, 1)));
    }

    #[test]
    fn filter_validation_rejects_bad_thresholds() {
        assert!(Filter::default().validate().is_ok());
        assert!(Filter { max_price_usd: -1.0, ..Default::default() }.validate().is_err());
        assert!(Filter { min_cpu_ghz: f64::NAN, ..Default::default() }.validate().is_err());
    }

    #[test]
    fn image_type_extensions() {
        assert_eq!(ImageType::from_extension("JPEG"), ImageType::Jpg);
        assert_eq!(ImageType::from_extension("png").extension(), "png");
        assert_eq!(ImageType::from_extension("tiff"), ImageType::Unknown);
    }
}
