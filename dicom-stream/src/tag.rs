use std::fmt::{Debug, Display, Formatter};

use serde::{Serialize, Serializer};

use crate::error::TagError;

/// Attribute tag, `(group,element)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    pub fn is_private(&self) -> bool {
        self.group % 2 == 1
    }

    /// Item and delimiter tags live in group FFFE and never carry a VR.
    pub fn is_delimiter_group(&self) -> bool {
        self.group == 0xFFFE
    }

    pub fn keyword(&self) -> Option<&'static str> {
        lookup(*self).map(|e| e.keyword)
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Value representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Vr {
    AE,
    AS,
    AT,
    CS,
    DA,
    DS,
    DT,
    FD,
    FL,
    IS,
    LO,
    LT,
    OB,
    OD,
    OF,
    OL,
    OV,
    OW,
    PN,
    SH,
    SL,
    SQ,
    SS,
    ST,
    SV,
    TM,
    UC,
    UI,
    UL,
    UN,
    UR,
    US,
    UT,
    UV,
}

impl Vr {
    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        let vr = match &bytes {
            b"AE" => Vr::AE,
            b"AS" => Vr::AS,
            b"AT" => Vr::AT,
            b"CS" => Vr::CS,
            b"DA" => Vr::DA,
            b"DS" => Vr::DS,
            b"DT" => Vr::DT,
            b"FD" => Vr::FD,
            b"FL" => Vr::FL,
            b"IS" => Vr::IS,
            b"LO" => Vr::LO,
            b"LT" => Vr::LT,
            b"OB" => Vr::OB,
            b"OD" => Vr::OD,
            b"OF" => Vr::OF,
            b"OL" => Vr::OL,
            b"OV" => Vr::OV,
            b"OW" => Vr::OW,
            b"PN" => Vr::PN,
            b"SH" => Vr::SH,
            b"SL" => Vr::SL,
            b"SQ" => Vr::SQ,
            b"SS" => Vr::SS,
            b"ST" => Vr::ST,
            b"SV" => Vr::SV,
            b"TM" => Vr::TM,
            b"UC" => Vr::UC,
            b"UI" => Vr::UI,
            b"UL" => Vr::UL,
            b"UN" => Vr::UN,
            b"UR" => Vr::UR,
            b"US" => Vr::US,
            b"UT" => Vr::UT,
            b"UV" => Vr::UV,
            _ => return None,
        };
        Some(vr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vr::AE => "AE",
            Vr::AS => "AS",
            Vr::AT => "AT",
            Vr::CS => "CS",
            Vr::DA => "DA",
            Vr::DS => "DS",
            Vr::DT => "DT",
            Vr::FD => "FD",
            Vr::FL => "FL",
            Vr::IS => "IS",
            Vr::LO => "LO",
            Vr::LT => "LT",
            Vr::OB => "OB",
            Vr::OD => "OD",
            Vr::OF => "OF",
            Vr::OL => "OL",
            Vr::OV => "OV",
            Vr::OW => "OW",
            Vr::PN => "PN",
            Vr::SH => "SH",
            Vr::SL => "SL",
            Vr::SQ => "SQ",
            Vr::SS => "SS",
            Vr::ST => "ST",
            Vr::SV => "SV",
            Vr::TM => "TM",
            Vr::UC => "UC",
            Vr::UI => "UI",
            Vr::UL => "UL",
            Vr::UN => "UN",
            Vr::UR => "UR",
            Vr::US => "US",
            Vr::UT => "UT",
            Vr::UV => "UV",
        }
    }

    /// Explicit VR encoding uses 2 reserved bytes and a 32-bit length for these.
    pub fn has_long_length(&self) -> bool {
        matches!(
            self,
            Vr::OB
                | Vr::OD
                | Vr::OF
                | Vr::OL
                | Vr::OV
                | Vr::OW
                | Vr::SQ
                | Vr::SV
                | Vr::UC
                | Vr::UN
                | Vr::UR
                | Vr::UT
                | Vr::UV
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self,
            Vr::AE
                | Vr::AS
                | Vr::CS
                | Vr::DA
                | Vr::DS
                | Vr::DT
                | Vr::IS
                | Vr::LO
                | Vr::LT
                | Vr::PN
                | Vr::SH
                | Vr::ST
                | Vr::TM
                | Vr::UC
                | Vr::UI
                | Vr::UR
                | Vr::UT
        )
    }

    /// Text VRs whose value may contain a backslash without being multi-valued.
    pub fn is_single_text(&self) -> bool {
        matches!(self, Vr::LT | Vr::ST | Vr::UT | Vr::UR)
    }
}

impl Display for Vr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Vr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

pub const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
pub const ITEM_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE00D);
pub const SEQUENCE_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE0DD);

pub const FILE_META_GROUP_LENGTH: Tag = Tag::new(0x0002, 0x0000);
pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
pub const SAMPLES_PER_PIXEL: Tag = Tag::new(0x0028, 0x0002);
pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag::new(0x0028, 0x0004);
pub const PLANAR_CONFIGURATION: Tag = Tag::new(0x0028, 0x0006);
pub const NUMBER_OF_FRAMES: Tag = Tag::new(0x0028, 0x0008);
pub const ROWS: Tag = Tag::new(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag::new(0x0028, 0x0011);
pub const BITS_ALLOCATED: Tag = Tag::new(0x0028, 0x0100);
pub const BITS_STORED: Tag = Tag::new(0x0028, 0x0101);
pub const PIXEL_REPRESENTATION: Tag = Tag::new(0x0028, 0x0103);
pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);

#[derive(Clone, Copy, Debug)]
pub struct DictEntry {
    pub tag: Tag,
    pub vr: Vr,
    pub keyword: &'static str,
}

const fn entry(group: u16, element: u16, vr: Vr, keyword: &'static str) -> DictEntry {
    DictEntry {
        tag: Tag::new(group, element),
        vr,
        keyword,
    }
}

// Sorted by tag; `lookup` relies on it.
static DICTIONARY: &[DictEntry] = &[
    entry(0x0002, 0x0000, Vr::UL, "FileMetaInformationGroupLength"),
    entry(0x0002, 0x0001, Vr::OB, "FileMetaInformationVersion"),
    entry(0x0002, 0x0002, Vr::UI, "MediaStorageSOPClassUID"),
    entry(0x0002, 0x0003, Vr::UI, "MediaStorageSOPInstanceUID"),
    entry(0x0002, 0x0010, Vr::UI, "TransferSyntaxUID"),
    entry(0x0002, 0x0012, Vr::UI, "ImplementationClassUID"),
    entry(0x0002, 0x0013, Vr::SH, "ImplementationVersionName"),
    entry(0x0002, 0x0016, Vr::AE, "SourceApplicationEntityTitle"),
    entry(0x0008, 0x0005, Vr::CS, "SpecificCharacterSet"),
    entry(0x0008, 0x0008, Vr::CS, "ImageType"),
    entry(0x0008, 0x0012, Vr::DA, "InstanceCreationDate"),
    entry(0x0008, 0x0013, Vr::TM, "InstanceCreationTime"),
    entry(0x0008, 0x0016, Vr::UI, "SOPClassUID"),
    entry(0x0008, 0x0018, Vr::UI, "SOPInstanceUID"),
    entry(0x0008, 0x0020, Vr::DA, "StudyDate"),
    entry(0x0008, 0x0021, Vr::DA, "SeriesDate"),
    entry(0x0008, 0x0022, Vr::DA, "AcquisitionDate"),
    entry(0x0008, 0x0023, Vr::DA, "ContentDate"),
    entry(0x0008, 0x0030, Vr::TM, "StudyTime"),
    entry(0x0008, 0x0031, Vr::TM, "SeriesTime"),
    entry(0x0008, 0x0033, Vr::TM, "ContentTime"),
    entry(0x0008, 0x0050, Vr::SH, "AccessionNumber"),
    entry(0x0008, 0x0060, Vr::CS, "Modality"),
    entry(0x0008, 0x0070, Vr::LO, "Manufacturer"),
    entry(0x0008, 0x0080, Vr::LO, "InstitutionName"),
    entry(0x0008, 0x0090, Vr::PN, "ReferringPhysicianName"),
    entry(0x0008, 0x1030, Vr::LO, "StudyDescription"),
    entry(0x0008, 0x103E, Vr::LO, "SeriesDescription"),
    entry(0x0008, 0x1090, Vr::LO, "ManufacturerModelName"),
    entry(0x0008, 0x1115, Vr::SQ, "ReferencedSeriesSequence"),
    entry(0x0008, 0x1140, Vr::SQ, "ReferencedImageSequence"),
    entry(0x0008, 0x1150, Vr::UI, "ReferencedSOPClassUID"),
    entry(0x0008, 0x1155, Vr::UI, "ReferencedSOPInstanceUID"),
    entry(0x0010, 0x0010, Vr::PN, "PatientName"),
    entry(0x0010, 0x0020, Vr::LO, "PatientID"),
    entry(0x0010, 0x0030, Vr::DA, "PatientBirthDate"),
    entry(0x0010, 0x0040, Vr::CS, "PatientSex"),
    entry(0x0010, 0x1010, Vr::AS, "PatientAge"),
    entry(0x0010, 0x1020, Vr::DS, "PatientSize"),
    entry(0x0010, 0x1030, Vr::DS, "PatientWeight"),
    entry(0x0018, 0x0015, Vr::CS, "BodyPartExamined"),
    entry(0x0018, 0x0050, Vr::DS, "SliceThickness"),
    entry(0x0018, 0x0060, Vr::DS, "KVP"),
    entry(0x0018, 0x0088, Vr::DS, "SpacingBetweenSlices"),
    entry(0x0018, 0x1020, Vr::LO, "SoftwareVersions"),
    entry(0x0018, 0x5100, Vr::CS, "PatientPosition"),
    entry(0x0020, 0x000D, Vr::UI, "StudyInstanceUID"),
    entry(0x0020, 0x000E, Vr::UI, "SeriesInstanceUID"),
    entry(0x0020, 0x0010, Vr::SH, "StudyID"),
    entry(0x0020, 0x0011, Vr::IS, "SeriesNumber"),
    entry(0x0020, 0x0013, Vr::IS, "InstanceNumber"),
    entry(0x0020, 0x0032, Vr::DS, "ImagePositionPatient"),
    entry(0x0020, 0x0037, Vr::DS, "ImageOrientationPatient"),
    entry(0x0020, 0x0052, Vr::UI, "FrameOfReferenceUID"),
    entry(0x0020, 0x1041, Vr::DS, "SliceLocation"),
    entry(0x0028, 0x0002, Vr::US, "SamplesPerPixel"),
    entry(0x0028, 0x0004, Vr::CS, "PhotometricInterpretation"),
    entry(0x0028, 0x0006, Vr::US, "PlanarConfiguration"),
    entry(0x0028, 0x0008, Vr::IS, "NumberOfFrames"),
    entry(0x0028, 0x0010, Vr::US, "Rows"),
    entry(0x0028, 0x0011, Vr::US, "Columns"),
    entry(0x0028, 0x0030, Vr::DS, "PixelSpacing"),
    entry(0x0028, 0x0100, Vr::US, "BitsAllocated"),
    entry(0x0028, 0x0101, Vr::US, "BitsStored"),
    entry(0x0028, 0x0102, Vr::US, "HighBit"),
    entry(0x0028, 0x0103, Vr::US, "PixelRepresentation"),
    entry(0x0028, 0x1050, Vr::DS, "WindowCenter"),
    entry(0x0028, 0x1051, Vr::DS, "WindowWidth"),
    entry(0x0028, 0x1052, Vr::DS, "RescaleIntercept"),
    entry(0x0028, 0x1053, Vr::DS, "RescaleSlope"),
    entry(0x0040, 0x0275, Vr::SQ, "RequestAttributesSequence"),
    entry(0x7FE0, 0x0010, Vr::OW, "PixelData"),
];

pub fn lookup(tag: Tag) -> Option<&'static DictEntry> {
    DICTIONARY
        .binary_search_by_key(&tag, |e| e.tag)
        .ok()
        .map(|i| &DICTIONARY[i])
}

/// VR used for implicit VR streams; unknown and private tags read as `UN`.
pub fn implicit_vr(tag: Tag) -> Vr {
    if tag.element == 0x0000 {
        // group length
        return Vr::UL;
    }
    lookup(tag).map(|e| e.vr).unwrap_or(Vr::UN)
}

/// Resolves a tag from its keyword (`PatientName`), `(0010,0010)` or `00100010`.
pub fn find_by_name(name: &str) -> Result<Tag, TagError> {
    let name = name.trim();
    if let Some(e) = DICTIONARY.iter().find(|e| e.keyword == name) {
        return Ok(e.tag);
    }
    parse_hex_tag(name).ok_or_else(|| TagError::UnknownName(name.to_string()))
}

fn parse_hex_tag(s: &str) -> Option<Tag> {
    let inner = s
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(s);
    let (group, element) = match inner.split_once(',') {
        Some((g, e)) => (g, e),
        None if inner.len() == 8 => inner.split_at(4),
        None => return None,
    };
    if group.len() != 4 || element.len() != 4 {
        return None;
    }
    Some(Tag::new(
        u16::from_str_radix(group, 16).ok()?,
        u16::from_str_radix(element, 16).ok()?,
    ))
}
