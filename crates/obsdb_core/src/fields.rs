//! Static declaration of the time-series and observation fields.
//!
//! Every column the store writes or filters on is listed here once. Pattern
//! filters may only name fields marked queryable, and a field's declared type
//! selects the pattern grammar used for it.

use serde::{Deserialize, Serialize};

use crate::model::{Link, TsMetadata};
use crate::{ObsError, ObsResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Int64,
    String,
    Links,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

macro_rules! ts_fields {
    (
        strings { $($s_variant:ident => $s_field:ident),* $(,)? }
        ints { $($i_variant:ident => $i_field:ident),* $(,)? }
    ) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum TsField {
            $($s_variant,)*
            $($i_variant,)*
            Links,
        }

        impl TsField {
            pub const ALL: &'static [TsField] = &[
                $(TsField::$s_variant,)*
                $(TsField::$i_variant,)*
                TsField::Links,
            ];

            pub fn name(self) -> &'static str {
                match self {
                    $(TsField::$s_variant => stringify!($s_field),)*
                    $(TsField::$i_variant => stringify!($i_field),)*
                    TsField::Links => "links",
                }
            }

            pub fn kind(self) -> FieldKind {
                match self {
                    $(TsField::$s_variant => FieldKind::String,)*
                    $(TsField::$i_variant => FieldKind::Int64,)*
                    TsField::Links => FieldKind::Links,
                }
            }

            pub fn value_of(self, ts: &TsMetadata) -> FieldValue {
                match self {
                    $(TsField::$s_variant => FieldValue::Str(ts.$s_field.clone()),)*
                    $(TsField::$i_variant => FieldValue::Int(ts.$i_field),)*
                    TsField::Links => FieldValue::Str(links_to_json(&ts.links)),
                }
            }

            pub fn assign(self, ts: &mut TsMetadata, value: FieldValue) -> ObsResult<()> {
                match (self, value) {
                    $((TsField::$s_variant, FieldValue::Str(value)) => ts.$s_field = value,)*
                    $((TsField::$i_variant, FieldValue::Int(value)) => ts.$i_field = value,)*
                    (TsField::Links, FieldValue::Str(value)) => ts.links = links_from_json(&value)?,
                    (field, value) => {
                        return Err(ObsError::storage(format!(
                            "column {} holds unexpected value {value:?}",
                            field.name()
                        )));
                    }
                }
                Ok(())
            }
        }
    };
}

ts_fields! {
    strings {
        Title => title,
        Summary => summary,
        Keywords => keywords,
        License => license,
        NamingAuthority => naming_authority,
        CreatorName => creator_name,
        Institution => institution,
        Source => source,
        Platform => platform,
        PlatformVocabulary => platform_vocabulary,
        PlatformName => platform_name,
        StandardName => standard_name,
        Unit => unit,
        Instrument => instrument,
        InstrumentVocabulary => instrument_vocabulary,
        ParameterName => parameter_name,
        Function => function,
    }
    ints {
        Level => level,
        Period => period,
    }
}

impl TsField {
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.name() == name)
    }
}

/// Natural key declared on a fresh schema when the configuration names none.
pub const DEFAULT_NATURAL_KEY: &[TsField] = &[
    TsField::NamingAuthority,
    TsField::Platform,
    TsField::StandardName,
    TsField::Level,
    TsField::Function,
    TsField::Period,
    TsField::Instrument,
];

fn links_to_json(links: &[Link]) -> String {
    serde_json::to_string(links).unwrap_or_else(|_| "[]".to_string())
}

fn links_from_json(raw: &str) -> ObsResult<Vec<Link>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|err| ObsError::storage(format!("decode links: {err}")))
}

/// Observation columns that pattern filters may reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObsField {
    QualityCode,
    ProcessingLevel,
    DataId,
    History,
}

impl ObsField {
    pub const ALL: &'static [ObsField] = &[
        ObsField::QualityCode,
        ObsField::ProcessingLevel,
        ObsField::DataId,
        ObsField::History,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ObsField::QualityCode => "quality_code",
            ObsField::ProcessingLevel => "processing_level",
            ObsField::DataId => "data_id",
            ObsField::History => "history",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            ObsField::QualityCode => FieldKind::Int64,
            _ => FieldKind::String,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryableField {
    TimeSeries(TsField),
    Observation(ObsField),
}

impl QueryableField {
    pub fn all() -> Vec<QueryableField> {
        TsField::ALL
            .iter()
            .copied()
            .filter(|field| field.kind() != FieldKind::Links)
            .map(QueryableField::TimeSeries)
            .chain(ObsField::ALL.iter().copied().map(QueryableField::Observation))
            .collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryableField::TimeSeries(field) => field.name(),
            QueryableField::Observation(field) => field.name(),
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            QueryableField::TimeSeries(field) => field.kind(),
            QueryableField::Observation(field) => field.kind(),
        }
    }

    pub fn sorted_names() -> Vec<String> {
        let mut names: Vec<String> = Self::all()
            .into_iter()
            .map(|field| field.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn lookup(name: &str) -> ObsResult<Self> {
        Self::all()
            .into_iter()
            .find(|field| field.name() == name)
            .ok_or_else(|| ObsError::unknown_field(name, Self::sorted_names()))
    }
}
