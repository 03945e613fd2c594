use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{TciError, TciResult};

pub const MIN_AGE: f64 = 18.0;
pub const MAX_AGE: f64 = 100.0;
pub const MIN_WEIGHT_KG: f64 = 30.0;
pub const MAX_WEIGHT_KG: f64 = 200.0;
pub const MIN_HEIGHT_CM: f64 = 120.0;
pub const MAX_HEIGHT_CM: f64 = 220.0;
pub const MIN_BMI: f64 = 12.0;
pub const MAX_BMI: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Covariate coding in the Masui model: male = 0, female = 1.
    pub fn as_covariate(self) -> f64 {
        match self {
            Sex::Male => 0.0,
            Sex::Female => 1.0,
        }
    }
}

impl std::fmt::Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sex::Male => write!(f, "Male"),
            Sex::Female => write!(f, "Female"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsaClass {
    /// ASA-PS I-II, covariate 0.
    Class1To2,
    /// ASA-PS III-IV, covariate 1.
    Class3To4,
}

impl AsaClass {
    pub fn as_covariate(self) -> f64 {
        match self {
            AsaClass::Class1To2 => 0.0,
            AsaClass::Class3To4 => 1.0,
        }
    }
}

impl std::fmt::Display for AsaClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsaClass::Class1To2 => write!(f, "ASA I-II"),
            AsaClass::Class3To4 => write!(f, "ASA III-IV"),
        }
    }
}

/// Patient covariates, immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub age: f64,
    pub weight: f64,
    pub height: f64,
    pub sex: Sex,
    pub asa_ps: AsaClass,
    pub start_time: NaiveDateTime,
}

impl Patient {
    pub fn new(
        id: impl Into<String>,
        age: f64,
        weight: f64,
        height: f64,
        sex: Sex,
        asa_ps: AsaClass,
        start_time: NaiveDateTime,
    ) -> TciResult<Self> {
        let patient = Self {
            id: id.into(),
            age,
            weight,
            height,
            sex,
            asa_ps,
            start_time,
        };
        patient.validate()?;
        Ok(patient)
    }

    pub fn validate(&self) -> TciResult<()> {
        if !self.age.is_finite() || self.age < MIN_AGE || self.age > MAX_AGE {
            return Err(TciError::InvalidPatient(format!(
                "age {} outside [{}, {}] years",
                self.age, MIN_AGE, MAX_AGE
            )));
        }
        if !self.weight.is_finite() || self.weight < MIN_WEIGHT_KG || self.weight > MAX_WEIGHT_KG {
            return Err(TciError::InvalidPatient(format!(
                "weight {} outside [{}, {}] kg",
                self.weight, MIN_WEIGHT_KG, MAX_WEIGHT_KG
            )));
        }
        if !self.height.is_finite() || self.height < MIN_HEIGHT_CM || self.height > MAX_HEIGHT_CM {
            return Err(TciError::InvalidPatient(format!(
                "height {} outside [{}, {}] cm",
                self.height, MIN_HEIGHT_CM, MAX_HEIGHT_CM
            )));
        }
        let bmi = self.bmi();
        if bmi < MIN_BMI || bmi > MAX_BMI {
            return Err(TciError::InvalidPatient(format!(
                "BMI {:.1} outside [{}, {}]",
                bmi, MIN_BMI, MAX_BMI
            )));
        }
        Ok(())
    }

    pub fn bmi(&self) -> f64 {
        let height_m = self.height / 100.0;
        self.weight / (height_m * height_m)
    }

    /// Ideal body weight (kg), Devine-style formula used by the Masui model.
    pub fn ibw(&self) -> f64 {
        45.4 + 0.89 * (self.height - 152.4) + 4.5 * (1.0 - self.sex.as_covariate())
    }

    /// Adjusted body weight (kg); the Masui model is parameterized on ABW.
    pub fn abw(&self) -> f64 {
        let ibw = self.ibw();
        ibw + 0.4 * (self.weight - ibw)
    }
}
