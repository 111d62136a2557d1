//! Intent classification backends.

pub mod classifier;

pub use classifier::{
    ClassifierVerdict, GeminiClassifier, IntentClassifier, IntentLabel, KeywordClassifier,
};
