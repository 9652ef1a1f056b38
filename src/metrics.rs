#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    pub page_number: usize,
    pub measure_ms: f64,
    pub paste_ms: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionMetrics {
    pub pages: Vec<PageMetrics>,
    pub measure_ms: f64,
    pub paste_ms: f64,
    pub renders: usize,
}

impl ConversionMetrics {
    pub fn total_ms(&self) -> f64 {
        self.measure_ms + self.paste_ms
    }
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
