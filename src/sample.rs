//! Random laptops for demos and tests.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::model::{
    Cpu, Gpu, Keyboard, KeyboardLayout, Laptop, Memory, MemoryUnit, Panel, Resolution, Screen,
    Storage, StorageDriver, Weight,
};

fn pick<R: Rng>(rng: &mut R, options: &[&str]) -> String {
    options.choose(rng).copied().unwrap_or_default().to_string()
}

pub fn new_keyboard() -> Keyboard {
    let mut rng = rand::thread_rng();
    let layout = match rng.gen_range(0..3) {
        0 => KeyboardLayout::Qwerty,
        1 => KeyboardLayout::Qwertz,
        _ => KeyboardLayout::Azerty,
    };
    Keyboard { layout, backlit: rng.gen() }
}

pub fn new_cpu() -> Cpu {
    let mut rng = rand::thread_rng();
    let brand = pick(&mut rng, &["Intel", "AMD"]);
    let name = if brand == "Intel" {
        pick(&mut rng, &["Xeon E-2286M", "Core i9-9980HK", "Core i7-9750H", "Core i5-9400F", "Core i3-1005G1"])
    } else {
        pick(&mut rng, &["Ryzen 7 PRO 2700U", "Ryzen 5 PRO 3500U", "Ryzen 3 PRO 3200GE"])
    };

    let number_cores = rng.gen_range(2..=8);
    let number_threads = rng.gen_range(number_cores..=12);
    let min_ghz = rng.gen_range(2.0..3.0);
    let max_ghz = rng.gen_range(min_ghz..5.0);

    Cpu { brand, name, number_cores, number_threads, min_ghz, max_ghz }
}

pub fn new_gpu() -> Gpu {
    let mut rng = rand::thread_rng();
    let brand = pick(&mut rng, &["NVIDIA", "AMD"]);
    let name = if brand == "NVIDIA" {
        pick(&mut rng, &["RTX 2060", "RTX 2070", "GTX 1660-Ti", "GTX 1070"])
    } else {
        pick(&mut rng, &["RX 590", "RX 580", "RX 5700-XT", "RX Vega-56"])
    };

    let min_ghz = rng.gen_range(1.0..1.5);
    let max_ghz = rng.gen_range(min_ghz..2.0);

    Gpu {
        brand,
        name,
        min_ghz,
        max_ghz,
        memory: Memory::gigabytes(rng.gen_range(2..=6)),
    }
}

pub fn new_ram() -> Memory {
    Memory::gigabytes(rand::thread_rng().gen_range(4..=64))
}

pub fn new_ssd() -> Storage {
    Storage {
        driver: StorageDriver::Ssd,
        memory: Memory::gigabytes(rand::thread_rng().gen_range(128..=1024)),
    }
}

pub fn new_hdd() -> Storage {
    Storage {
        driver: StorageDriver::Hdd,
        memory: Memory::new(rand::thread_rng().gen_range(1..=6), MemoryUnit::Terabyte),
    }
}

pub fn new_screen() -> Screen {
    let mut rng = rand::thread_rng();
    let height = rng.gen_range(1080..=4320);
    Screen {
        size_inch: rng.gen_range(13.0..17.0),
        resolution: Resolution { width: height * 16 / 9, height },
        panel: if rng.gen() { Panel::Ips } else { Panel::Oled },
        multitouch: rng.gen(),
    }
}

pub fn new_laptop() -> Laptop {
    let mut rng = rand::thread_rng();
    let brand = pick(&mut rng, &["Apple", "Dell", "Lenovo"]);
    let name = match brand.as_str() {
        "Apple" => pick(&mut rng, &["Macbook Air", "Macbook Pro"]),
        "Dell" => pick(&mut rng, &["Latitude", "Vostro", "XPS", "Alienware"]),
        _ => pick(&mut rng, &["Thinkpad X1", "Thinkpad P1", "Thinkpad P53"]),
    };
    let updated_at = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default();

    Laptop {
        id: Uuid::new_v4().to_string(),
        brand,
        name,
        cpu: new_cpu(),
        ram: new_ram(),
        gpus: vec![new_gpu()],
        storages: vec![new_hdd(), new_ssd()],
        screen: new_screen(),
        keyboard: new_keyboard(),
        weight: Weight::Kg(rng.gen_range(1.0..3.0)),
        price_usd: rng.gen_range(1500.0..3500.0),
        release_year: rng.gen_range(2015..=2019),
        updated_at,
    }
}
