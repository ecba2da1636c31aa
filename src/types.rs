use std::fmt;

/// Access mode of an opened resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Access {
    #[default]
    ReadOnly,
    Update,
}

/// Pixel data type of a raster band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
    /// Type of a band that could not be resolved; zero-sized
    Unknown,
}

impl DataType {
    /// Size of one pixel in bytes
    pub fn size(self) -> usize {
        match self {
            DataType::Byte => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::UInt32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
            DataType::Unknown => 0,
        }
    }
}

/// Color interpretation of a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorInterp {
    #[default]
    Undefined,
    Gray,
    Palette,
    Red,
    Green,
    Blue,
    Alpha,
}

/// Affine pixel/line to georeferenced transform
///
/// `x = gt[0] + pixel * gt[1] + line * gt[2]`,
/// `y = gt[3] + pixel * gt[4] + line * gt[5]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl Default for GeoTransform {
    fn default() -> Self {
        GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }
}

impl GeoTransform {
    /// Convert pixel/line coordinates to georeferenced coordinates
    pub fn apply(&self, pixel: f64, line: f64) -> (f64, f64) {
        let gt = &self.0;
        (
            gt[0] + pixel * gt[1] + line * gt[2],
            gt[3] + pixel * gt[4] + line * gt[5],
        )
    }

    /// Scale the pixel-size terms by `rx` along pixels and `ry` along lines
    pub fn scaled(&self, rx: f64, ry: f64) -> GeoTransform {
        let mut gt = self.0;
        gt[1] *= rx;
        gt[4] *= rx;
        gt[2] *= ry;
        gt[5] *= ry;
        GeoTransform(gt)
    }
}

/// Ground control point
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gcp {
    pub id: String,
    pub info: String,
    /// Pixel (column) of the control point in raster space
    pub pixel: f64,
    /// Line (row) of the control point in raster space
    pub line: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Pixel window in raster space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x_off: usize,
    pub y_off: usize,
    pub x_size: usize,
    pub y_size: usize,
}

impl Window {
    pub fn new(x_off: usize, y_off: usize, x_size: usize, y_size: usize) -> Self {
        Window {
            x_off,
            y_off,
            x_size,
            y_size,
        }
    }

    /// Whether the window lies inside a raster of the given size
    pub fn fits(&self, width: usize, height: usize) -> bool {
        self.x_off
            .checked_add(self.x_size)
            .map_or(false, |end| end <= width)
            && self
                .y_off
                .checked_add(self.y_size)
                .map_or(false, |end| end <= height)
    }
}

/// Ordered key/value metadata list of one domain
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataList {
    items: Vec<(String, String)>,
}

impl MetadataList {
    pub fn new() -> Self {
        MetadataList { items: Vec::new() }
    }

    /// Value of `name`, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace `name` in place, or append it
    pub fn set(&mut self, name: &str, value: &str) {
        match self
            .items
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(item) => item.1 = value.to_string(),
            None => self.items.push((name.to_string(), value.to_string())),
        }
    }

    /// Remove `name`, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self
            .items
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.items.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = MetadataList::new();
        for (k, v) in iter {
            let (k, v) = (k.into(), v.into());
            list.set(&k, &v);
        }
        list
    }
}

impl fmt::Display for MetadataList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (k, v) in &self.items {
            writeln!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_set_replaces_case_insensitively() {
        let mut md: MetadataList = [("LINE_OFF", "10"), ("SAMP_OFF", "20")].into_iter().collect();
        md.set("line_off", "5");
        assert_eq!(md.len(), 2);
        assert_eq!(md.get("LINE_OFF"), Some("5"));
        assert_eq!(md.remove("SAMP_OFF").as_deref(), Some("20"));
        assert!(md.get("SAMP_OFF").is_none());
    }

    #[test]
    fn test_window_fits() {
        assert!(Window::new(0, 0, 10, 10).fits(10, 10));
        assert!(!Window::new(5, 0, 6, 1).fits(10, 10));
        assert!(!Window::new(usize::MAX, 0, 2, 1).fits(10, 10));
    }
}
