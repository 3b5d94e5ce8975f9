//! Tiny ONNX models encoded in memory for backend tests.

use std::io::Write;

use crate::tensor::{InputTensor, TensorMap};

// Minimal protobuf writer, enough to emit a one-node ONNX graph.
fn varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn int_field(field: u64, value: u64, out: &mut Vec<u8>) {
    varint(field << 3, out);
    varint(value, out);
}

fn bytes_field(field: u64, bytes: &[u8], out: &mut Vec<u8>) {
    varint((field << 3) | 2, out);
    varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Float tensor `ValueInfoProto`. Negative dims become symbolic `dim_param`s.
fn value_info(name: &str, dims: &[i64]) -> Vec<u8> {
    let mut shape = Vec::new();
    for (axis, &d) in dims.iter().enumerate() {
        let mut dim = Vec::new();
        if d < 0 {
            bytes_field(2, format!("{}_{}", name, axis).as_bytes(), &mut dim);
        } else {
            int_field(1, d as u64, &mut dim);
        }
        bytes_field(1, &dim, &mut shape);
    }
    let mut tensor = Vec::new();
    int_field(1, 1, &mut tensor); // FLOAT
    bytes_field(2, &shape, &mut tensor);
    let mut ty = Vec::new();
    bytes_field(1, &tensor, &mut ty);

    let mut info = Vec::new();
    bytes_field(1, name.as_bytes(), &mut info);
    bytes_field(2, &ty, &mut info);
    info
}

fn global_pool(input: &[i64], output: &[i64]) -> Vec<u8> {
    let mut node = Vec::new();
    bytes_field(1, b"data", &mut node);
    bytes_field(2, b"prob", &mut node);
    bytes_field(3, b"prob", &mut node);
    bytes_field(4, b"GlobalAveragePool", &mut node);

    let mut graph = Vec::new();
    bytes_field(1, &node, &mut graph);
    bytes_field(2, b"pooling", &mut graph);
    bytes_field(11, &value_info("data", input), &mut graph);
    bytes_field(12, &value_info("prob", output), &mut graph);

    let mut opset = Vec::new();
    bytes_field(1, b"", &mut opset);
    int_field(2, 13, &mut opset);

    let mut model = Vec::new();
    int_field(1, 7, &mut model);
    bytes_field(7, &graph, &mut model);
    bytes_field(8, &opset, &mut model);
    model
}

/// `data[1,3,2,2]` -> GlobalAveragePool -> `prob[1,3,1,1]`.
pub(crate) fn pooling_model() -> Vec<u8> {
    global_pool(&[1, 3, 2, 2], &[1, 3, 1, 1])
}

/// `data[?,3,?,?]` -> GlobalAveragePool -> `prob[?,3,1,1]`.
pub(crate) fn dynamic_pooling_model() -> Vec<u8> {
    global_pool(&[-1, 3, -1, -1], &[-1, 3, 1, 1])
}

/// Write model bytes to a temp file that lives as long as the handle.
pub(crate) fn model_file(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file
}

/// `[1,3,h,w]` input where every value of channel `c` is `c + 1`.
pub(crate) fn channel_input(h: usize, w: usize) -> TensorMap {
    let mut data = Vec::new();
    for c in 0..3 {
        data.extend(std::iter::repeat((c + 1) as f32).take(h * w));
    }
    TensorMap::from([(
        "data".to_string(),
        InputTensor::from_f32(data, vec![1, 3, h, w]).unwrap(),
    )])
}
