//! Serde helpers for durations written as humantime strings (`10s`, `250ms`) or seconds.

use std::time::Duration;

use serde::{Deserializer, Serializer};

struct SecondsVisitor {
    /// Non-positive numbers mean "no limit" instead of being rejected.
    allow_infinite: bool,
}

impl SecondsVisitor {
    fn signed<E: serde::de::Error>(&self, v: f64) -> Result<Option<Duration>, E> {
        if !v.is_finite() {
            return Err(E::custom("duration must be a finite number"));
        }
        if v < 0.0 || (self.allow_infinite && v == 0.0) {
            if self.allow_infinite {
                return Ok(None);
            }
            return Err(E::custom("duration must not be negative"));
        }
        Ok(Some(Duration::from_secs_f64(v)))
    }
}

impl<'de> serde::de::Visitor<'de> for SecondsVisitor {
    type Value = Option<Duration>;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if self.allow_infinite && v == 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_secs(v)))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.signed(v as f64)
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.signed(v)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        let s = v.trim();
        if self.allow_infinite && matches!(s, "-1" | "infinite" | "inf") {
            return Ok(None);
        }
        if let Ok(secs) = s.parse::<f64>() {
            return self.signed(secs);
        }
        humantime::parse_duration(s)
            .map(Some)
            .map_err(|err| E::custom(format!("invalid duration `{s}`: {err}")))
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if self.allow_infinite {
            Ok(None)
        } else {
            Err(E::custom("duration is required"))
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_none()
    }
}

pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer
        .deserialize_any(SecondsVisitor {
            allow_infinite: false,
        })?
        .ok_or_else(|| serde::de::Error::custom("duration is required"))
}

/// `None` means infinite; `-1`, `0` and negative numbers map to it.
pub mod infinite {
    use super::*;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => super::serialize(d, serializer),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SecondsVisitor {
            allow_infinite: true,
        })
    }
}

pub mod seq {
    use serde::de::{SeqAccess, Visitor};
    use serde::ser::SerializeSeq;

    use super::*;

    pub fn serialize<S>(value: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for d in value {
            seq.serialize_element(&humantime::format_duration(*d).to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct V;

        impl<'de> Visitor<'de> for V {
            type Value = Vec<Duration>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a list of durations")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(d) = seq.next_element::<Element>()? {
                    out.push(d.0);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_seq(V)
    }

    struct Element(Duration);

    impl<'de> serde::Deserialize<'de> for Element {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            super::deserialize(deserializer).map(Element)
        }
    }
}
