pub mod classical;
pub mod factory;
pub mod logreg;
pub mod model_interface;
pub mod session;
pub mod svm;
pub mod switchtab;
