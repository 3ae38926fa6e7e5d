//! ESC/POS command encoding for the receipt printer.
//!
//! Pure byte generation, no I/O: [`EscPosBuilder`] appends exact command
//! sequences, [`CodePage`] encodes text for the selected character table and
//! [`BarcodeSpec`] carries a validated barcode payload.

use crate::error::DeviceError;

// ESC/POS command bytes
const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// Bar height in dots set before every barcode.
const BARCODE_HEIGHT: u8 = 0x50;
/// HRI characters printed below the bars.
const BARCODE_HRI_BELOW: u8 = 0x02;

// ---------------------------------------------------------------------------
// Code pages
// ---------------------------------------------------------------------------

/// Character tables selectable with `ESC t n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePage {
    /// PC437, the command set default.
    Pc437,
    /// PC866, Cyrillic text.
    Pc866,
}

impl CodePage {
    pub fn number(self) -> u8 {
        match self {
            CodePage::Pc437 => 0,
            CodePage::Pc866 => 17,
        }
    }

    /// Encode text for this table. Unmappable characters become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(text.len());
        for ch in text.chars() {
            let code = ch as u32;
            if code < 0x80 {
                bytes.push(code as u8);
                continue;
            }
            let mapped = match self {
                CodePage::Pc437 => None,
                CodePage::Pc866 => cyrillic_to_cp866(ch),
            };
            bytes.push(mapped.unwrap_or(b'?'));
        }
        bytes
    }
}

/// Map a Unicode Cyrillic character to its CP866 byte value.
fn cyrillic_to_cp866(ch: char) -> Option<u8> {
    let code = ch as u32;
    match ch {
        // А..Я, а..п
        '\u{0410}'..='\u{043F}' => Some((code - 0x0410 + 0x80) as u8),
        // р..я
        '\u{0440}'..='\u{044F}' => Some((code - 0x0440 + 0xE0) as u8),
        'Ё' => Some(0xF0),
        'ё' => Some(0xF1),
        'Є' => Some(0xF2),
        'є' => Some(0xF3),
        'Ї' => Some(0xF4),
        'ї' => Some(0xF5),
        'Ў' => Some(0xF6),
        'ў' => Some(0xF7),
        '°' => Some(0xF8),
        '·' => Some(0xFA),
        '№' => Some(0xFC),
        '¤' => Some(0xFD),
        '\u{00A0}' => Some(0xFF),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    pub fn number(self) -> u8 {
        match self {
            Alignment::Left => 0,
            Alignment::Center => 1,
            Alignment::Right => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Barcodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    Code39,
    Code128,
    Ean13,
}

impl Symbology {
    /// Resolve an operator-facing tag such as `"CODE128"`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "CODE39" => Some(Symbology::Code39),
            "CODE128" => Some(Symbology::Code128),
            "EAN13" => Some(Symbology::Ean13),
            _ => None,
        }
    }

    /// Device type code `m` of `GS k m n d1..dn`.
    pub fn type_code(self) -> u8 {
        match self {
            Symbology::Code39 => 69,
            Symbology::Code128 => 73,
            Symbology::Ean13 => 67,
        }
    }
}

/// A barcode payload that fits the one-byte length field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeSpec {
    symbology: Symbology,
    data: String,
}

impl BarcodeSpec {
    pub fn new(symbology: Symbology, data: &str) -> Result<Self, DeviceError> {
        if !data.is_ascii() {
            return Err(DeviceError::InvalidBarcode(format!(
                "payload {data:?} is not ASCII"
            )));
        }
        if data.len() > u8::MAX as usize {
            return Err(DeviceError::InvalidBarcode(format!(
                "payload is {} bytes, limit is 255",
                data.len()
            )));
        }
        Ok(Self {
            symbology,
            data: data.to_string(),
        })
    }

    pub fn symbology(&self) -> Symbology {
        self.symbology
    }

    pub fn data(&self) -> &str {
        &self.data
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for ESC/POS binary command buffers.
///
/// ```rust,ignore
/// let mut b = EscPosBuilder::new();
/// b.init().code_page(CodePage::Pc866).text("Привет\n", CodePage::Pc866).cut();
/// let data = b.build();
/// ```
#[derive(Debug, Default)]
pub struct EscPosBuilder {
    buffer: Vec<u8>,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// ESC @: Initialize printer, reset to defaults.
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// ESC t n: Select character code page.
    pub fn code_page(&mut self, page: CodePage) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x74, page.number()]);
        self
    }

    /// Append text encoded for `page`, unescaped.
    pub fn text(&mut self, s: &str, page: CodePage) -> &mut Self {
        self.buffer.extend(page.encode(s));
        self
    }

    /// `lines` bare line feeds.
    pub fn feed(&mut self, lines: usize) -> &mut Self {
        self.buffer.extend(std::iter::repeat(LF).take(lines));
        self
    }

    /// ESC a n
    pub fn align(&mut self, alignment: Alignment) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, alignment.number()]);
        self
    }

    /// GS V 0: Full cut.
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x00]);
        self
    }

    /// GS h n, GS H n, then GS k m n d1..dn.
    pub fn barcode(&mut self, spec: &BarcodeSpec) -> &mut Self {
        let data = spec.data().as_bytes();
        self.buffer.extend_from_slice(&[GS, 0x68, BARCODE_HEIGHT]);
        self.buffer.extend_from_slice(&[GS, 0x48, BARCODE_HRI_BELOW]);
        self.buffer
            .extend_from_slice(&[GS, 0x6B, spec.symbology().type_code(), data.len() as u8]);
        self.buffer.extend_from_slice(data);
        self
    }

    /// GS v 0 m xL xH yL yH d1..dk: raster bit image, normal density.
    pub fn raster_image(&mut self, width_bytes: u16, height: u16, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x76, 0x30, 0x00]);
        self.buffer.extend_from_slice(&width_bytes.to_le_bytes());
        self.buffer.extend_from_slice(&height.to_le_bytes());
        self.buffer.extend_from_slice(data);
        self
    }

    /// Consume the builder and return the binary ESC/POS payload.
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
