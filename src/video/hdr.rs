//! HDR metadata pass-through
//!
//! Mastering-display and content-light-level side data travels with each
//! decoded frame. The presentation side receives it as a fixed 12-field
//! record in 24.8 fixed point, plus an EOTF selector.

/// Mastering display colour volume (SMPTE ST 2086)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MasteringDisplay {
    /// Red, green, blue primaries as CIE 1931 xy
    pub primaries: [[f64; 2]; 3],
    pub white_point: [f64; 2],
    /// cd/m²
    pub min_luminance: f64,
    pub max_luminance: f64,
    pub has_primaries: bool,
    pub has_luminance: bool,
}

impl MasteringDisplay {
    /// Both primaries and luminance are present
    pub fn is_complete(&self) -> bool {
        self.has_primaries && self.has_luminance
    }
}

/// Content light level (CTA-861.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    pub max_cll: u32,
    pub max_fall: u32,
}

/// Side-channel metadata attached to a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HdrMetadata {
    pub mastering: Option<MasteringDisplay>,
    pub content_light: Option<ContentLightLevel>,
}

impl HdrMetadata {
    pub fn is_empty(&self) -> bool {
        self.mastering.is_none() && self.content_light.is_none()
    }
}

/// Signed 24.8 fixed point, the convention of the metadata interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fixed(pub i32);

impl Fixed {
    pub fn from_f64(value: f64) -> Self {
        Fixed((value * 256.0).round() as i32)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 256.0
    }
}

/// Electro-optical transfer function announced with the metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eotf {
    /// SMPTE ST 2084
    #[default]
    St2084Pq,
}

/// The record sent to the presentation surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HdrMetadataRecord {
    pub red: [Fixed; 2],
    pub green: [Fixed; 2],
    pub blue: [Fixed; 2],
    pub white_point: [Fixed; 2],
    pub max_luminance: Fixed,
    pub min_luminance: Fixed,
    /// 0 when the frame carries no content light level
    pub max_cll: u32,
    /// 0 when the frame carries no content light level
    pub max_fall: u32,
}

impl HdrMetadataRecord {
    /// Build the record, or `None` unless complete mastering metadata is present
    pub fn from_metadata(metadata: &HdrMetadata) -> Option<Self> {
        let mastering = metadata.mastering.filter(MasteringDisplay::is_complete)?;
        let xy = |pair: [f64; 2]| [Fixed::from_f64(pair[0]), Fixed::from_f64(pair[1])];
        let light = metadata.content_light.unwrap_or_default();

        Some(Self {
            red: xy(mastering.primaries[0]),
            green: xy(mastering.primaries[1]),
            blue: xy(mastering.primaries[2]),
            white_point: xy(mastering.white_point),
            max_luminance: Fixed::from_f64(mastering.max_luminance),
            min_luminance: Fixed::from_f64(mastering.min_luminance),
            max_cll: light.max_cll,
            max_fall: light.max_fall,
        })
    }
}

/// Colour primaries reported by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorPrimaries {
    Bt709,
    Bt470M,
    Bt470Bg,
    Smpte170M,
    Smpte240M,
    Smpte431,
    Smpte432,
    Smpte428,
    Bt2020,
    #[default]
    Unspecified,
}

/// Chromaticities understood by the colour-space interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Chromaticities {
    #[default]
    Undefined,
    Bt709,
    Bt470M,
    Bt470Bg,
    Smpte170M,
    DciP3,
    CieXyz,
    Bt2020,
}

impl From<ColorPrimaries> for Chromaticities {
    fn from(primaries: ColorPrimaries) -> Self {
        match primaries {
            ColorPrimaries::Bt709 => Chromaticities::Bt709,
            ColorPrimaries::Bt470M => Chromaticities::Bt470M,
            ColorPrimaries::Bt470Bg => Chromaticities::Bt470Bg,
            // SMPTE 240M shares the 170M primaries
            ColorPrimaries::Smpte170M | ColorPrimaries::Smpte240M => Chromaticities::Smpte170M,
            ColorPrimaries::Smpte431 | ColorPrimaries::Smpte432 => Chromaticities::DciP3,
            ColorPrimaries::Smpte428 => Chromaticities::CieXyz,
            ColorPrimaries::Bt2020 => Chromaticities::Bt2020,
            ColorPrimaries::Unspecified => Chromaticities::Undefined,
        }
    }
}

/// Receiver of colour-space and HDR metadata for the video surface
pub trait HdrMetadataSink {
    fn set_chromaticities(&mut self, chromaticities: Chromaticities);

    /// Create the auxiliary metadata handle for the surface
    fn create_surface(&mut self);

    fn set_metadata(&mut self, record: &HdrMetadataRecord, eotf: Eotf);

    /// Destroy the auxiliary metadata handle
    fn destroy_surface(&mut self);
}

/// What applying a frame's metadata did to the metadata handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrTransition {
    Created,
    Updated,
    Destroyed,
    Unchanged,
}

/// Tracks whether the metadata handle exists so create/destroy stay idempotent
#[derive(Debug, Default)]
pub struct HdrState {
    active: bool,
}

impl HdrState {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Forward a frame's metadata to `sink`
    ///
    /// Complete mastering metadata creates the handle (once) and sets the
    /// record. No mastering metadata destroys the handle (once). Incomplete
    /// mastering metadata leaves everything as it was.
    pub fn apply<S: HdrMetadataSink + ?Sized>(&mut self, sink: &mut S, metadata: &HdrMetadata) -> HdrTransition {
        match metadata.mastering {
            None => {
                if !self.active {
                    return HdrTransition::Unchanged;
                }
                sink.destroy_surface();
                self.active = false;
                tracing::debug!("HDR metadata gone, destroyed metadata surface");
                HdrTransition::Destroyed
            }
            Some(_) => {
                let Some(record) = HdrMetadataRecord::from_metadata(metadata) else {
                    tracing::trace!("Incomplete mastering metadata, keeping current state");
                    return HdrTransition::Unchanged;
                };
                let transition = if self.active {
                    HdrTransition::Updated
                } else {
                    sink.create_surface();
                    self.active = true;
                    tracing::debug!("HDR metadata present, created metadata surface");
                    HdrTransition::Created
                };
                sink.set_metadata(&record, Eotf::St2084Pq);
                transition
            }
        }
    }

    /// Destroy the handle if it exists
    pub fn reset<S: HdrMetadataSink + ?Sized>(&mut self, sink: &mut S) {
        if self.active {
            sink.destroy_surface();
            self.active = false;
        }
    }
}

/// Sink that records and logs what it receives; used when no compositor
/// metadata protocol is available
#[derive(Debug, Default)]
pub struct LoggingHdrSink {
    pub chromaticities: Chromaticities,
    pub surface_active: bool,
    pub last_record: Option<HdrMetadataRecord>,
    pub last_eotf: Option<Eotf>,
    pub surfaces_created: u32,
    pub surfaces_destroyed: u32,
}

impl HdrMetadataSink for LoggingHdrSink {
    fn set_chromaticities(&mut self, chromaticities: Chromaticities) {
        tracing::info!(?chromaticities, "Colour space");
        self.chromaticities = chromaticities;
    }

    fn create_surface(&mut self) {
        self.surface_active = true;
        self.surfaces_created += 1;
    }

    fn set_metadata(&mut self, record: &HdrMetadataRecord, eotf: Eotf) {
        tracing::debug!(
            max_luminance = record.max_luminance.to_f64(),
            min_luminance = record.min_luminance.to_f64(),
            max_cll = record.max_cll,
            max_fall = record.max_fall,
            ?eotf,
            "HDR metadata"
        );
        self.last_record = Some(*record);
        self.last_eotf = Some(eotf);
    }

    fn destroy_surface(&mut self) {
        self.surface_active = false;
        self.surfaces_destroyed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bt2020_mastering() -> MasteringDisplay {
        MasteringDisplay {
            primaries: [[0.708, 0.292], [0.170, 0.797], [0.131, 0.046]],
            white_point: [0.3127, 0.3290],
            min_luminance: 0.0050,
            max_luminance: 1000.0,
            has_primaries: true,
            has_luminance: true,
        }
    }

    #[test]
    fn test_fixed_point_rounding() {
        assert_eq!(Fixed::from_f64(1.0), Fixed(256));
        assert_eq!(Fixed::from_f64(0.708), Fixed(181));
        assert_eq!(Fixed::from_f64(-0.5), Fixed(-128));
        assert_eq!(Fixed(512).to_f64(), 2.0);
    }

    #[test]
    fn test_record_uses_zero_sentinel_without_light_level() {
        let metadata = HdrMetadata {
            mastering: Some(bt2020_mastering()),
            content_light: None,
        };
        let record = HdrMetadataRecord::from_metadata(&metadata).unwrap();
        assert_eq!(record.max_cll, 0);
        assert_eq!(record.max_fall, 0);
        assert_eq!(record.max_luminance, Fixed(256_000));
        assert_eq!(record.red, [Fixed::from_f64(0.708), Fixed::from_f64(0.292)]);
    }

    #[test]
    fn test_record_passes_light_level_through() {
        let metadata = HdrMetadata {
            mastering: Some(bt2020_mastering()),
            content_light: Some(ContentLightLevel {
                max_cll: 1000,
                max_fall: 400,
            }),
        };
        let record = HdrMetadataRecord::from_metadata(&metadata).unwrap();
        assert_eq!((record.max_cll, record.max_fall), (1000, 400));
    }

    #[test]
    fn test_incomplete_mastering_has_no_record() {
        let mut mastering = bt2020_mastering();
        mastering.has_luminance = false;
        let metadata = HdrMetadata {
            mastering: Some(mastering),
            content_light: None,
        };
        assert!(HdrMetadataRecord::from_metadata(&metadata).is_none());
    }

    #[test]
    fn test_state_is_idempotent() {
        let mut sink = LoggingHdrSink::default();
        let mut state = HdrState::default();
        let present = HdrMetadata {
            mastering: Some(bt2020_mastering()),
            content_light: None,
        };

        assert_eq!(state.apply(&mut sink, &present), HdrTransition::Created);
        assert_eq!(state.apply(&mut sink, &present), HdrTransition::Updated);
        assert_eq!(sink.surfaces_created, 1);

        assert_eq!(state.apply(&mut sink, &HdrMetadata::default()), HdrTransition::Destroyed);
        assert_eq!(state.apply(&mut sink, &HdrMetadata::default()), HdrTransition::Unchanged);
        assert_eq!(sink.surfaces_destroyed, 1);
        assert!(!sink.surface_active);
    }

    #[test]
    fn test_incomplete_metadata_keeps_surface() {
        let mut sink = LoggingHdrSink::default();
        let mut state = HdrState::default();
        let present = HdrMetadata {
            mastering: Some(bt2020_mastering()),
            content_light: None,
        };
        state.apply(&mut sink, &present);

        let mut partial = bt2020_mastering();
        partial.has_primaries = false;
        let incomplete = HdrMetadata {
            mastering: Some(partial),
            content_light: None,
        };
        assert_eq!(state.apply(&mut sink, &incomplete), HdrTransition::Unchanged);
        assert!(state.is_active());
        assert!(sink.surface_active);
    }

    #[test]
    fn test_chromaticity_mapping() {
        assert_eq!(Chromaticities::from(ColorPrimaries::Bt2020), Chromaticities::Bt2020);
        assert_eq!(Chromaticities::from(ColorPrimaries::Smpte240M), Chromaticities::Smpte170M);
        assert_eq!(Chromaticities::from(ColorPrimaries::Smpte432), Chromaticities::DciP3);
        assert_eq!(Chromaticities::from(ColorPrimaries::Unspecified), Chromaticities::Undefined);
    }
}
