#![allow(dead_code)]

use gantry_core::{Kinematics, MachineConfig};

pub const CARTESIAN: &str = r#"
[printer]
kinematics = "cartesian"
max_velocity = 300
max_accel = 3000
max_z_velocity = 10
max_z_accel = 100

[stepper_x]
step_distance = 0.0125
position_endstop = 0
position_max = 200
homing_speed = 50

[stepper_y]
step_distance = 0.0125
position_endstop = 0
position_max = 220
homing_speed = 50

[stepper_z]
step_distance = 0.0025
position_endstop = 0
position_max = 180
"#;

pub const COREXY: &str = r#"
[printer]
kinematics = "corexy"
max_velocity = 300
max_accel = 3000
max_z_velocity = 10
max_z_accel = 100

[stepper_x]
step_distance = 0.0125
position_endstop = 0
position_max = 200
homing_speed = 50

[stepper_y]
step_distance = 0.0125
position_endstop = 0
position_max = 220
homing_speed = 50

[stepper_z]
step_distance = 0.0025
position_endstop = 0
position_max = 180
"#;

pub const DELTA: &str = r#"
[printer]
kinematics = "delta"
max_velocity = 300
max_accel = 3000
max_z_velocity = 150
delta_radius = 146.477116

[stepper_a]
step_distance = 0.01
position_endstop = 257.0
arm_length = 272.0

[stepper_b]
step_distance = 0.01
position_endstop = 257.5

[stepper_c]
step_distance = 0.01
position_endstop = 256.8
"#;

pub const DELTESIAN: &str = r#"
[printer]
kinematics = "deltesian"
max_velocity = 300
max_accel = 3000

[stepper_left]
step_distance = 0.01
position_endstop = 250
arm_length = 217
arm_x_length = 160

[stepper_right]
step_distance = 0.01

[stepper_y]
step_distance = 0.0125
position_endstop = 0
position_max = 200
"#;

pub const ROTARY_DELTA: &str = r#"
[printer]
kinematics = "rotary_delta"
max_velocity = 300
max_accel = 3000
shoulder_radius = 33.9
shoulder_height = 412.5

[stepper_a]
step_distance = 0.0225
position_endstop = 252
upper_arm_length = 170
lower_arm_length = 320

[stepper_b]
step_distance = 0.0225
upper_arm_length = 170
lower_arm_length = 320

[stepper_c]
step_distance = 0.0225
upper_arm_length = 170
lower_arm_length = 320
"#;

pub const WINCH: &str = r#"
[printer]
kinematics = "winch"
max_velocity = 300
max_accel = 3000

[stepper_a]
step_distance = 0.001
anchor_x = 16.4
anchor_y = -1610.98
anchor_z = -131.53

[stepper_b]
step_distance = 0.001
anchor_x = 1314.22
anchor_y = 1268.14
anchor_z = -121.28

[stepper_c]
step_distance = 0.001
anchor_x = -1415.73
anchor_y = 707.61
anchor_z = -121.82

[stepper_d]
step_distance = 0.001
anchor_x = 0
anchor_y = 0
anchor_z = 2299.83
"#;

pub const SCARA: &str = r#"
[printer]
kinematics = "scara"
max_velocity = 300
max_accel = 3000
inner_arm_length = 150
outer_arm_length = 120

[stepper_shoulder]
step_distance = 0.01
position_min = -90
position_max = 90
position_endstop = 90

[stepper_elbow]
step_distance = 0.01
position_min = 0
position_max = 150
position_endstop = 150

[stepper_z]
step_distance = 0.0025
position_endstop = 0
position_max = 180
"#;

pub fn machine(source: &str) -> MachineConfig {
    toml::from_str(source).unwrap()
}

pub fn kinematics(source: &str) -> Kinematics {
    Kinematics::from_config(&machine(source)).unwrap()
}

/// A winch machine with the cable flex model switched on
pub fn loaded_winch() -> MachineConfig {
    let mut config = machine(WINCH);
    config.printer.mover_weight = Some(2.0);
    config.printer.spring_constant = Some(20000.0);
    config
}

/// Map a fuzzer-chosen integer onto `[lo, hi]`
pub fn scale(v: u16, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * f64::from(v) / f64::from(u16::MAX)
}
