//! Engineering unit symbols by BACnet units enumeration value

/// Display symbol for a BACnet engineering unit, if it has one
pub fn unit_symbol(code: u32) -> Option<&'static str> {
    let symbol = match code {
        0 => "m²",
        1 => "ft²",
        2 => "mA",
        3 => "A",
        4 => "Ω",
        5 => "V",
        6 => "kV",
        7 => "MV",
        8 => "VA",
        9 => "kVA",
        10 => "MVA",
        11 => "var",
        12 => "kvar",
        13 => "Mvar",
        14 => "°",
        15 => "PF",
        16 => "J",
        17 => "kJ",
        18 => "Wh",
        19 => "kWh",
        20 => "BTU",
        21 => "therm",
        22 => "ton·h",
        23 => "J/kg dry air",
        24 => "BTU/lb dry air",
        25 => "cycles/h",
        26 => "cycles/min",
        27 => "Hz",
        28 => "g water/kg dry air",
        29 => "%RH",
        30 => "mm",
        31 => "m",
        32 => "in",
        33 => "ft",
        34 => "W/ft²",
        35 => "W/m²",
        36 => "lm",
        37 => "lx",
        38 => "fc",
        39 => "kg",
        40 => "lb",
        41 => "t",
        42 => "kg/s",
        43 => "kg/min",
        44 => "kg/h",
        45 => "lb/min",
        46 => "lb/h",
        47 => "W",
        48 => "kW",
        49 => "MW",
        50 => "BTU/h",
        51 => "hp",
        52 => "tons",
        53 => "Pa",
        54 => "kPa",
        55 => "bar",
        56 => "psi",
        57 => "cm H₂O",
        58 => "in H₂O",
        59 => "mmHg",
        60 => "cmHg",
        61 => "inHg",
        62 => "°C",
        63 => "K",
        64 => "°F",
        65 => "°C·d",
        66 => "°F·d",
        67 => "y",
        68 => "mo",
        69 => "wk",
        70 => "d",
        71 => "h",
        72 => "min",
        73 => "s",
        74 => "m/s",
        75 => "km/h",
        76 => "ft/s",
        77 => "ft/min",
        78 => "mph",
        79 => "ft³",
        80 => "m³",
        81 => "gal (UK)",
        82 => "L",
        83 => "gal (US)",
        84 => "ft³/min",
        85 => "m³/s",
        86 => "gal/min (UK)",
        87 => "L/s",
        88 => "L/min",
        89 => "gal/min (US)",
        90 => "°",
        91 => "°C/h",
        92 => "°C/min",
        93 => "°F/h",
        94 => "°F/min",
        96 => "ppm",
        97 => "ppb",
        98 => "%",
        99 => "%/s",
        100 => "/min",
        101 => "/s",
        102 => "psi/°F",
        103 => "rad",
        104 => "rpm",
        115 => "in²",
        116 => "cm²",
        117 => "BTU/lb",
        118 => "cm",
        119 => "lb/s",
        120 => "°F",
        121 => "K",
        122 => "kΩ",
        123 => "MΩ",
        124 => "mV",
        125 => "kJ/kg",
        126 => "MJ",
        127 => "J/K",
        128 => "J/(kg·K)",
        129 => "kHz",
        130 => "MHz",
        131 => "/h",
        132 => "mW",
        133 => "hPa",
        134 => "mbar",
        135 => "m³/h",
        136 => "L/h",
        137 => "kWh/m²",
        138 => "kWh/ft²",
        139 => "MJ/m²",
        140 => "MJ/ft²",
        141 => "W/(m²·K)",
        142 => "ft³/s",
        143 => "%/ft",
        144 => "%/m",
        145 => "mΩ",
        146 => "MWh",
        147 => "kBTU",
        148 => "MBTU",
        149 => "kJ/(kg dry air)",
        150 => "MJ/(kg dry air)",
        151 => "kJ/K",
        152 => "MJ/K",
        153 => "N",
        154 => "g/s",
        155 => "g/min",
        156 => "t/h",
        157 => "kBTU/h",
        158 => "0.01s",
        159 => "ms",
        160 => "N·m",
        161 => "mm/s",
        162 => "mm/min",
        163 => "m/min",
        164 => "m/h",
        165 => "m³/min",
        166 => "m/s²",
        167 => "A/m",
        168 => "A/m²",
        169 => "A·m²",
        170 => "F",
        171 => "H",
        172 => "Ω·m",
        173 => "S",
        174 => "S/m",
        175 => "T",
        176 => "V/K",
        177 => "V/m",
        178 => "Wb",
        179 => "cd",
        180 => "cd/m²",
        181 => "K/h",
        182 => "K/min",
        183 => "J·s",
        184 => "rad/s",
        185 => "m²/N",
        186 => "kg/m³",
        187 => "N·s",
        188 => "N/m",
        189 => "W/(m·K)",
        _ => return None,
    };
    Some(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_units() {
        assert_eq!(unit_symbol(62), Some("°C"));
        assert_eq!(unit_symbol(64), Some("°F"));
        assert_eq!(unit_symbol(98), Some("%"));
        assert_eq!(unit_symbol(95), None);
        assert_eq!(unit_symbol(100_000), None);
    }
}
